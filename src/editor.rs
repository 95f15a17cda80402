//! Rotary-encoder driven settings editor.
//!
//! Three pages of elements. Turning the knob moves the selection (with
//! wrap-around) or, in edit mode, changes the selected value by one step.
//! Pressing activates buttons and toggles edit mode on value fields. All
//! writes go through [`SharedProcess`], so the sequencer still decides
//! whether an edit is legal.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::log::*;
use crate::pid::{clamp, PidGains};
use crate::process::SharedProcess;
use crate::profile::ParameterId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EncoderEvent {
    Clockwise,
    CounterClockwise,
    Press,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Page {
    Main,
    OvenSettings,
    PidSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gain {
    Kp,
    Ki,
    Kd,
}

impl Gain {
    /// Editable range of the gain.
    pub const fn limits(&self) -> (f32, f32) {
        match self {
            Gain::Kp => (0.0, 100.0),
            Gain::Ki => (0.0, 30.0),
            Gain::Kd => (0.0, 30.0),
        }
    }

    fn get(&self, gains: &PidGains) -> f32 {
        match self {
            Gain::Kp => gains.kp,
            Gain::Ki => gains.ki,
            Gain::Kd => gains.kd,
        }
    }

    fn set(&self, gains: &mut PidGains, value: f32) {
        match self {
            Gain::Kp => gains.kp = value,
            Gain::Ki => gains.ki = value,
            Gain::Kd => gains.kd = value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Element {
    Start,
    Stop,
    OvenSettings,
    PidSettings,
    Parameter(ParameterId),
    Gain(Gain),
    Return,
}

impl Element {
    pub fn editable(&self) -> bool {
        matches!(self, Element::Parameter(_) | Element::Gain(_))
    }

    /// Amount one encoder detent changes the value by.
    pub fn step(&self) -> f32 {
        match self {
            Element::Parameter(
                ParameterId::PreheatRate | ParameterId::HeatupRate | ParameterId::CooldownRate,
            ) => 0.1,
            Element::Parameter(_) => 1.0,
            Element::Gain(_) => 0.5,
            _ => 0.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Element::Start => "START",
            Element::Stop => "STOP",
            Element::OvenSettings => "OVEN SETTINGS",
            Element::PidSettings => "PID SETTINGS",
            Element::Parameter(id) => id.to_str(),
            Element::Gain(Gain::Kp) => "KP",
            Element::Gain(Gain::Ki) => "KI",
            Element::Gain(Gain::Kd) => "KD",
            Element::Return => "RETURN TO MAIN",
        }
    }
}

const MAIN_PAGE: [Element; 4] = [
    Element::Start,
    Element::Stop,
    Element::OvenSettings,
    Element::PidSettings,
];

const OVEN_SETTINGS_PAGE: [Element; 9] = [
    Element::Parameter(ParameterId::PreheatRate),
    Element::Parameter(ParameterId::SoakTemperature),
    Element::Parameter(ParameterId::SoakTime),
    Element::Parameter(ParameterId::HeatupRate),
    Element::Parameter(ParameterId::ReflowTemperature),
    Element::Parameter(ParameterId::ReflowTime),
    Element::Parameter(ParameterId::CooldownRate),
    Element::Parameter(ParameterId::CooldownTemperature),
    Element::Return,
];

const PID_SETTINGS_PAGE: [Element; 4] = [
    Element::Gain(Gain::Kp),
    Element::Gain(Gain::Ki),
    Element::Gain(Gain::Kd),
    Element::Return,
];

impl Page {
    pub fn elements(&self) -> &'static [Element] {
        match self {
            Page::Main => &MAIN_PAGE,
            Page::OvenSettings => &OVEN_SETTINGS_PAGE,
            Page::PidSettings => &PID_SETTINGS_PAGE,
        }
    }
}

/// What an event did, for the display side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EditorResponse {
    Selected(Element),
    PageChanged(Page),
    EditMode(bool),
    /// `start_process` result.
    Started(bool),
    StopRequested,
    ParameterChanged(ParameterId, f32),
    /// The sequencer refused the new value (out of range or not idle).
    ParameterRejected(ParameterId),
    GainsChanged(PidGains),
}

pub struct ParameterEditor<'a, M: RawMutex> {
    process: &'a SharedProcess<M>,
    page: Page,
    index: usize,
    editing: bool,
}

impl<'a, M: RawMutex> ParameterEditor<'a, M> {
    pub fn new(process: &'a SharedProcess<M>) -> Self {
        Self {
            process,
            page: Page::Main,
            index: 0,
            editing: false,
        }
    }

    pub fn page(&self) -> Page {
        self.page
    }

    pub fn selected(&self) -> Element {
        self.page.elements()[self.index]
    }

    pub fn editing(&self) -> bool {
        self.editing
    }

    /// Current value behind an editable element.
    pub fn value(&self, element: Element) -> Option<f32> {
        match element {
            Element::Parameter(id) => Some(self.process.parameter(id)),
            Element::Gain(gain) => Some(gain.get(&self.process.gains())),
            _ => None,
        }
    }

    pub fn handle(&mut self, event: EncoderEvent) -> EditorResponse {
        match event {
            EncoderEvent::Clockwise => self.rotate(1),
            EncoderEvent::CounterClockwise => self.rotate(-1),
            EncoderEvent::Press => self.press(),
        }
    }

    fn rotate(&mut self, delta: i8) -> EditorResponse {
        if !self.editing {
            let count = self.page.elements().len() as isize;
            self.index = (self.index as isize + delta as isize).rem_euclid(count) as usize;
            return EditorResponse::Selected(self.selected());
        }

        let element = self.selected();
        let step = element.step();
        let change = delta as f32 * step;
        match element {
            Element::Parameter(id) => {
                let value = snap_to_step(self.process.parameter(id) + change, step);
                if self.process.modify_parameter(id, value) {
                    EditorResponse::ParameterChanged(id, value)
                } else {
                    EditorResponse::ParameterRejected(id)
                }
            }
            Element::Gain(gain) => {
                let mut gains = self.process.gains();
                let (min, max) = gain.limits();
                let value = clamp(snap_to_step(gain.get(&gains) + change, step), min, max);
                gain.set(&mut gains, value);
                self.process.update_gains(gains.kp, gains.ki, gains.kd);
                debug!("Gains kp {} ki {} kd {}", gains.kp, gains.ki, gains.kd);
                EditorResponse::GainsChanged(gains)
            }
            // Edit mode is only entered on editable elements.
            _ => EditorResponse::Selected(element),
        }
    }

    fn press(&mut self) -> EditorResponse {
        let element = self.selected();
        if element.editable() {
            self.editing = !self.editing;
            return EditorResponse::EditMode(self.editing);
        }
        match element {
            Element::Start => {
                let started = self.process.start_process();
                if started {
                    info!("Start requested");
                }
                EditorResponse::Started(started)
            }
            Element::Stop => {
                info!("Stop requested");
                self.process.stop_process();
                EditorResponse::StopRequested
            }
            Element::OvenSettings => self.open(Page::OvenSettings),
            Element::PidSettings => self.open(Page::PidSettings),
            _ => self.open(Page::Main),
        }
    }

    fn open(&mut self, page: Page) -> EditorResponse {
        self.page = page;
        self.index = 0;
        self.editing = false;
        EditorResponse::PageChanged(page)
    }
}

/// Round `value` to the nearest multiple of `step` so repeated detents
/// do not accumulate float error.
fn snap_to_step(value: f32, step: f32) -> f32 {
    let steps = value / step;
    let whole = if steps < 0.0 {
        (steps - 0.5) as i32
    } else {
        (steps + 0.5) as i32
    };
    whole as f32 * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Phase;
    use crate::sequencer::tests::pid;
    use crate::sequencer::ReflowSequencer;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    fn process() -> SharedProcess<NoopRawMutex> {
        SharedProcess::new(ReflowSequencer::default(), pid())
    }

    #[test]
    fn navigation_wraps_around() {
        let process = process();
        let mut editor = ParameterEditor::new(&process);
        assert_eq!(
            editor.handle(EncoderEvent::CounterClockwise),
            EditorResponse::Selected(Element::PidSettings)
        );
        assert_eq!(
            editor.handle(EncoderEvent::Clockwise),
            EditorResponse::Selected(Element::Start)
        );
    }

    #[test]
    fn start_and_stop_buttons() {
        let process = process();
        let mut editor = ParameterEditor::new(&process);
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::Started(true)
        );
        process.step(25.0, 0);
        assert_eq!(process.current_phase(), Phase::Preheat);
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::Started(false)
        );

        editor.handle(EncoderEvent::Clockwise);
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::StopRequested
        );
        process.step(25.0, 100);
        assert_eq!(process.current_phase(), Phase::Cooldown);
    }

    #[test]
    fn edits_parameters_through_the_sequencer() {
        let process = process();
        let mut editor = ParameterEditor::new(&process);
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Clockwise);
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::PageChanged(Page::OvenSettings)
        );

        // Soak temperature
        editor.handle(EncoderEvent::Clockwise);
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::EditMode(true)
        );
        assert_eq!(
            editor.handle(EncoderEvent::Clockwise),
            EditorResponse::ParameterChanged(ParameterId::SoakTemperature, 151.0)
        );
        assert_eq!(
            editor.value(Element::Parameter(ParameterId::SoakTemperature)),
            Some(151.0)
        );
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::EditMode(false)
        );

        // Return button is last; wrap backwards onto it.
        editor.handle(EncoderEvent::CounterClockwise);
        editor.handle(EncoderEvent::CounterClockwise);
        assert_eq!(editor.selected(), Element::Return);
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::PageChanged(Page::Main)
        );
        assert_eq!(editor.selected(), Element::Start);
    }

    #[test]
    fn out_of_range_edit_rejected() {
        let process = process();
        assert!(process.modify_parameter(ParameterId::SoakTemperature, 180.0));
        let mut editor = ParameterEditor::new(&process);
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Press);
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Press);
        assert_eq!(
            editor.handle(EncoderEvent::Clockwise),
            EditorResponse::ParameterRejected(ParameterId::SoakTemperature)
        );
        assert_eq!(process.parameter(ParameterId::SoakTemperature), 180.0);
    }

    #[test]
    fn edits_rejected_while_running() {
        let process = process();
        assert!(process.start_process());
        process.step(25.0, 0);

        let mut editor = ParameterEditor::new(&process);
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Press);
        editor.handle(EncoderEvent::Press);
        assert_eq!(
            editor.handle(EncoderEvent::Clockwise),
            EditorResponse::ParameterRejected(ParameterId::PreheatRate)
        );
        assert_eq!(process.parameter(ParameterId::PreheatRate), 0.5);
    }

    #[test]
    fn rate_steps_are_fine_grained() {
        let process = process();
        let mut editor = ParameterEditor::new(&process);
        editor.handle(EncoderEvent::CounterClockwise);
        editor.handle(EncoderEvent::CounterClockwise);
        editor.handle(EncoderEvent::Press);
        editor.handle(EncoderEvent::Press);
        editor.handle(EncoderEvent::Clockwise);
        let rate = process.parameter(ParameterId::PreheatRate);
        assert!((rate - 0.6).abs() < 1e-6);
    }

    #[test]
    fn gains_are_clamped() {
        let process = process();
        let mut editor = ParameterEditor::new(&process);
        editor.handle(EncoderEvent::CounterClockwise);
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::PageChanged(Page::PidSettings)
        );
        // Ki starts at 0.5
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Press);
        editor.handle(EncoderEvent::CounterClockwise);
        let response = editor.handle(EncoderEvent::CounterClockwise);
        let gains = process.gains();
        assert_eq!(gains.ki, 0.0);
        assert_eq!(response, EditorResponse::GainsChanged(gains));
        assert_eq!(editor.value(Element::Gain(Gain::Ki)), Some(0.0));
    }

    /// Open the oven settings page and enter edit mode on `id`.
    fn edit(editor: &mut ParameterEditor<'_, NoopRawMutex>, id: ParameterId) {
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Clockwise);
        editor.handle(EncoderEvent::Press);
        while editor.selected() != Element::Parameter(id) {
            editor.handle(EncoderEvent::Clockwise);
        }
        assert_eq!(
            editor.handle(EncoderEvent::Press),
            EditorResponse::EditMode(true)
        );
    }

    #[test]
    fn rates_reach_their_maximum() {
        for id in [
            ParameterId::PreheatRate,
            ParameterId::HeatupRate,
            ParameterId::CooldownRate,
        ] {
            let process = process();
            let mut editor = ParameterEditor::new(&process);
            edit(&mut editor, id);
            let max = id.range().max;
            for _ in 0..60 {
                editor.handle(EncoderEvent::Clockwise);
            }
            assert_eq!(process.parameter(id), max, "{}", id.to_str());
            assert_eq!(
                editor.handle(EncoderEvent::Clockwise),
                EditorResponse::ParameterRejected(id)
            );
        }
    }

    #[test]
    fn detents_stay_on_the_step_grid() {
        let process = process();
        let mut editor = ParameterEditor::new(&process);
        edit(&mut editor, ParameterId::PreheatRate);
        for _ in 0..7 {
            editor.handle(EncoderEvent::Clockwise);
        }
        for _ in 0..7 {
            editor.handle(EncoderEvent::CounterClockwise);
        }
        assert_eq!(process.parameter(ParameterId::PreheatRate), 0.5);
    }

    #[test]
    fn snapping_rounds_to_nearest_step() {
        assert_eq!(snap_to_step(19.0 * 0.1 + 0.1 + 1e-6, 0.1), 20.0 * 0.1);
        assert_eq!(snap_to_step(150.9999, 1.0), 151.0);
        assert_eq!(snap_to_step(-0.26, 0.5), -0.5);
    }
}
