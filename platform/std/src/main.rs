use std::io::BufRead;
use std::path::{Path, PathBuf};

use clap::Parser;
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_sync::watch::Watch;
use embassy_time::{Duration, Timer};
use log::*;
use reflow_oven::editor::EditorResponse;
use reflow_oven::simulator::{OvenModel, SensorBoard};
use reflow_oven::{
    ControlLoop, EncoderEvent, HeaterCommand, OvenConfig, OvenStatus, ParameterEditor, Phase,
    PidController, ReflowSequencer, SharedProcess, SignalHeater, SystemClock, ThermocoupleBus,
    AMBIENT_TEMPERATURE, VERSION,
};
use static_cell::StaticCell;

type Process = SharedProcess<CriticalSectionRawMutex>;

/// Second thermocouple sits near the door and reads a little cooler.
const DOOR_SENSOR_OFFSET: f32 = -3.0;
const PLANT_STEP_MILLIS: u64 = 50;

static PROCESS: StaticCell<Process> = StaticCell::new();
static BOARD: SensorBoard<CriticalSectionRawMutex> = SensorBoard::new();
static HEATER_POWER: Signal<CriticalSectionRawMutex, HeaterCommand> = Signal::new();
static ENCODER_EVENTS: Channel<CriticalSectionRawMutex, EncoderEvent, 8> = Channel::new();
static STATUS: Watch<CriticalSectionRawMutex, OvenStatus, 1> = Watch::new();

/// Reflow oven controller running against a simulated oven.
///
/// Encoder input is read from stdin: `+` clockwise, `-` counter-clockwise,
/// empty line or `p` to press.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Press START this many seconds after boot
    #[arg(long)]
    auto_start_secs: Option<u64>,

    /// Exit once a run has finished back in IDLE
    #[arg(long)]
    exit_when_done: bool,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

fn load_config(path: Option<&Path>) -> Result<OvenConfig, String> {
    let Some(path) = path else {
        return Ok(OvenConfig::default());
    };
    let json = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    OvenConfig::from_json(&json).map_err(|e| format!("{}: {}", path.display(), e))
}

#[embassy_executor::task]
async fn control_task(process: &'static Process, config: OvenConfig) {
    let bus = ThermocoupleBus::new(
        BOARD.spi(),
        [BOARD.chip_select(0), BOARD.chip_select(1)],
        Duration::from_millis(config.bus_timeout_millis.into()),
    );
    let mut sensors = match bus {
        Ok(sensors) => sensors,
        Err(e) => {
            error!("Thermocouple bus: {}", e);
            return;
        }
    };
    for channel in 0..2 {
        if let Err(e) = sensors.add_device(channel).await {
            warn!("Thermocouple {}: {}", channel, e);
        }
    }

    let heater = SignalHeater::new(&HEATER_POWER, (config.pid.out_min, config.pid.out_max));
    let mut control = match ControlLoop::new(process, sensors, heater, SystemClock, &config) {
        Ok(control) => control,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    info!("Control loop running every {} ms", config.tick_millis);
    control.run(&STATUS).await
}

#[embassy_executor::task]
async fn plant_task() -> ! {
    let mut oven = OvenModel::default();
    let mut power = 0u8;
    let dt_s = PLANT_STEP_MILLIS as f32 / 1000.0;
    info!(
        "Thermal model: max_rate={} C/s, loss={}, mass={}",
        oven.max_heating_rate, oven.heat_loss, oven.thermal_mass
    );

    loop {
        if let Some(HeaterCommand::SetPower(p)) = HEATER_POWER.try_take() {
            power = p;
        }
        let temperature = oven.step(power, dt_s);
        BOARD.set_temperature(0, temperature);
        BOARD.set_temperature(1, (temperature + DOOR_SENSOR_OFFSET).max(AMBIENT_TEMPERATURE));
        Timer::after_millis(PLANT_STEP_MILLIS).await;
    }
}

#[embassy_executor::task]
async fn editor_task(process: &'static Process) -> ! {
    let mut editor = ParameterEditor::new(process);
    loop {
        let event = ENCODER_EVENTS.receive().await;
        match editor.handle(event) {
            EditorResponse::Selected(element) => info!("> {}", element.label()),
            EditorResponse::EditMode(true) => {
                let element = editor.selected();
                info!(
                    "Editing {} = {}",
                    element.label(),
                    editor.value(element).unwrap_or_default()
                );
            }
            EditorResponse::Started(false) => warn!("Start ignored, process running"),
            other => info!("{:?}", other),
        }
    }
}

#[embassy_executor::task]
async fn auto_start_task(secs: u64) {
    Timer::after_secs(secs).await;
    info!("Auto start");
    // The editor boots on the main page with START selected.
    ENCODER_EVENTS.send(EncoderEvent::Press).await;
}

#[embassy_executor::task]
async fn status_task(exit_when_done: bool) {
    let Some(mut receiver) = STATUS.receiver() else {
        error!("No status receiver available");
        return;
    };
    let mut ticks = 0u32;
    let mut last_phase = Phase::Idle;
    let mut ran = false;
    loop {
        let status = receiver.changed().await;
        ticks = ticks.wrapping_add(1);
        if status.phase != last_phase || ticks % 10 == 0 {
            match status.measured {
                Some(measured) => info!(
                    "{:<8} {:>3}s  {:6.1} C -> {:6.1} C  out {:5.1}{}",
                    status.phase.to_str(),
                    status.elapsed_secs,
                    measured,
                    status.setpoint,
                    status.output,
                    if status.emergency_stop { "  EMERGENCY STOP" } else { "" }
                ),
                None => error!("{} sensor missing", status.phase.to_str()),
            }
        }

        if status.phase != Phase::Idle {
            ran = true;
        } else if ran && last_phase != Phase::Idle {
            info!("Run finished");
            if exit_when_done {
                std::process::exit(if status.emergency_stop { 2 } else { 0 });
            }
        }
        last_phase = status.phase;
    }
}

/// Blocking stdin reader feeding the encoder channel.
fn spawn_encoder_input() {
    std::thread::spawn(|| {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let event = match line.trim() {
                "+" => EncoderEvent::Clockwise,
                "-" => EncoderEvent::CounterClockwise,
                "" | "p" => EncoderEvent::Press,
                other => {
                    warn!("Unknown input {:?}", other);
                    continue;
                }
            };
            if ENCODER_EVENTS.try_send(event).is_err() {
                warn!("Encoder queue full");
            }
        }
    });
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let args = Args::parse();
    env_logger::builder()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let pid = match PidController::new(&config.pid) {
        Ok(pid) => pid,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Reflow oven {} (simulated)", VERSION);

    let process: &'static Process = PROCESS.init(SharedProcess::new(
        ReflowSequencer::new(config.parameters),
        pid,
    ));
    BOARD.set_temperature(0, AMBIENT_TEMPERATURE);
    BOARD.set_temperature(1, AMBIENT_TEMPERATURE);

    spawner.spawn(plant_task().unwrap());
    spawner.spawn(status_task(args.exit_when_done).unwrap());
    spawner.spawn(control_task(process, config).unwrap());
    spawner.spawn(editor_task(process).unwrap());
    if let Some(secs) = args.auto_start_secs {
        spawner.spawn(auto_start_task(secs).unwrap());
    }
    spawn_encoder_input();
}
