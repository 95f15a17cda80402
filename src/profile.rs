use serde::{Deserialize, Serialize};

/// One stage of the reflow thermal profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Idle,
    Preheat,
    Soak,
    Heatup,
    Reflow,
    Cooldown,
}

impl Phase {
    pub fn to_str(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Preheat => "Preheat",
            Phase::Soak => "Soak",
            Phase::Heatup => "Heatup",
            Phase::Reflow => "Reflow",
            Phase::Cooldown => "Cooldown",
        }
    }
}

/// Identifies one editable field of [`ReflowParameters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterId {
    PreheatRate,
    SoakTemperature,
    SoakTime,
    HeatupRate,
    ReflowTemperature,
    ReflowTime,
    CooldownRate,
    CooldownTemperature,
}

/// Legal range of a parameter. `min` is exclusive for the rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterRange {
    pub min: f32,
    pub max: f32,
    pub min_exclusive: bool,
}

impl ParameterRange {
    const fn closed(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            min_exclusive: false,
        }
    }

    const fn rate(max: f32) -> Self {
        Self {
            min: 0.0,
            max,
            min_exclusive: true,
        }
    }

    pub fn contains(&self, value: f32) -> bool {
        let above = if self.min_exclusive {
            value > self.min
        } else {
            value >= self.min
        };
        above && value <= self.max
    }
}

impl ParameterId {
    pub const ALL: [ParameterId; 8] = [
        ParameterId::PreheatRate,
        ParameterId::SoakTemperature,
        ParameterId::SoakTime,
        ParameterId::HeatupRate,
        ParameterId::ReflowTemperature,
        ParameterId::ReflowTime,
        ParameterId::CooldownRate,
        ParameterId::CooldownTemperature,
    ];

    pub const fn range(&self) -> ParameterRange {
        match self {
            ParameterId::PreheatRate => ParameterRange::rate(2.0),
            ParameterId::SoakTemperature => ParameterRange::closed(100.0, 180.0),
            ParameterId::SoakTime => ParameterRange::closed(30.0, 180.0),
            ParameterId::HeatupRate => ParameterRange::rate(3.0),
            ParameterId::ReflowTemperature => ParameterRange::closed(200.0, 240.0),
            ParameterId::ReflowTime => ParameterRange::closed(10.0, 90.0),
            ParameterId::CooldownRate => ParameterRange::rate(5.0),
            ParameterId::CooldownTemperature => ParameterRange::closed(25.0, 100.0),
        }
    }

    pub fn accepts(&self, value: f32) -> bool {
        self.range().contains(value)
    }

    pub fn to_str(&self) -> &'static str {
        match self {
            ParameterId::PreheatRate => "Preheat rate",
            ParameterId::SoakTemperature => "Soak temp",
            ParameterId::SoakTime => "Soak time",
            ParameterId::HeatupRate => "Heatup rate",
            ParameterId::ReflowTemperature => "Reflow temp",
            ParameterId::ReflowTime => "Reflow time",
            ParameterId::CooldownRate => "Cooldown rate",
            ParameterId::CooldownTemperature => "Cooldown temp",
        }
    }
}

/// Temperature and timing parameters of a reflow run.
/// Rates in °C/s, temperatures in °C, times in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflowParameters {
    pub preheat_rate: f32,
    pub soak_temperature: f32,
    pub soak_time: f32,
    pub heatup_rate: f32,
    pub reflow_temperature: f32,
    pub reflow_time: f32,
    pub cooldown_rate: f32,
    pub cooldown_temperature: f32,
}

impl Default for ReflowParameters {
    fn default() -> Self {
        Self {
            preheat_rate: 0.5,
            soak_temperature: 150.0,
            soak_time: 60.0,
            heatup_rate: 1.0,
            reflow_temperature: 220.0,
            reflow_time: 30.0,
            cooldown_rate: 1.0,
            cooldown_temperature: 50.0,
        }
    }
}

impl ReflowParameters {
    pub fn get(&self, id: ParameterId) -> f32 {
        match id {
            ParameterId::PreheatRate => self.preheat_rate,
            ParameterId::SoakTemperature => self.soak_temperature,
            ParameterId::SoakTime => self.soak_time,
            ParameterId::HeatupRate => self.heatup_rate,
            ParameterId::ReflowTemperature => self.reflow_temperature,
            ParameterId::ReflowTime => self.reflow_time,
            ParameterId::CooldownRate => self.cooldown_rate,
            ParameterId::CooldownTemperature => self.cooldown_temperature,
        }
    }

    /// Write `value` if it lies inside the field's legal range.
    pub(crate) fn set(&mut self, id: ParameterId, value: f32) -> bool {
        if !id.accepts(value) {
            return false;
        }
        let field = match id {
            ParameterId::PreheatRate => &mut self.preheat_rate,
            ParameterId::SoakTemperature => &mut self.soak_temperature,
            ParameterId::SoakTime => &mut self.soak_time,
            ParameterId::HeatupRate => &mut self.heatup_rate,
            ParameterId::ReflowTemperature => &mut self.reflow_temperature,
            ParameterId::ReflowTime => &mut self.reflow_time,
            ParameterId::CooldownRate => &mut self.cooldown_rate,
            ParameterId::CooldownTemperature => &mut self.cooldown_temperature,
        };
        *field = value;
        true
    }
}
