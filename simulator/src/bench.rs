use fermctl_common::{ApplianceRole, CommandResult, PlugAction};

#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub ambient: f32,
    pub start_temp: f32,
    /// Fraction of the gap to ambient closed per step.
    pub drift: f32,
    /// Degrees added (heater) or removed (cooler) per step while running.
    pub appliance_rate: f32,
    pub heater_endpoint: String,
    pub cooler_endpoint: String,
    pub drop_every: Option<u32>,
    pub fail_every: Option<u32>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            ambient: 70.0,
            start_temp: 70.0,
            drift: 0.05,
            appliance_rate: 0.4,
            heater_endpoint: "heater-plug".to_string(),
            cooler_endpoint: "cooler-plug".to_string(),
            drop_every: None,
            fail_every: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlugReply {
    Publish(CommandResult),
    /// The plug acted but its result is lost.
    Drop,
}

/// A fermenter in a room with two smart plugs attached.
#[derive(Debug, Clone)]
pub struct Bench {
    config: BenchConfig,
    temperature: f32,
    heater_on: bool,
    cooler_on: bool,
    commands: u32,
}

impl Bench {
    pub fn new(config: BenchConfig) -> Self {
        Self {
            temperature: config.start_temp,
            config,
            heater_on: false,
            cooler_on: false,
            commands: 0,
        }
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn is_on(&self, role: ApplianceRole) -> bool {
        match role {
            ApplianceRole::Heater => self.heater_on,
            ApplianceRole::Cooler => self.cooler_on,
        }
    }

    pub fn endpoints(&self) -> [&str; 2] {
        [&self.config.heater_endpoint, &self.config.cooler_endpoint]
    }

    /// Advances the physics by one publish interval and returns the new reading.
    pub fn step(&mut self) -> f32 {
        let mut delta = (self.config.ambient - self.temperature) * self.config.drift;
        if self.heater_on {
            delta += self.config.appliance_rate;
        }
        if self.cooler_on {
            delta -= self.config.appliance_rate;
        }
        self.temperature += delta;
        self.temperature
    }

    /// `None` when the command is not addressed to one of the bench plugs or
    /// cannot be parsed.
    pub fn handle_command(&mut self, endpoint: &str, payload: &str) -> Option<PlugReply> {
        let role = self.role_for(endpoint)?;
        let action = PlugAction::parse(payload)?;
        self.commands = self.commands.wrapping_add(1);

        if hits(self.config.fail_every, self.commands) {
            return Some(PlugReply::Publish(CommandResult {
                endpoint: endpoint.to_string(),
                action,
                success: false,
                error: Some("simulated relay fault".to_string()),
            }));
        }

        match role {
            ApplianceRole::Heater => self.heater_on = action.is_on(),
            ApplianceRole::Cooler => self.cooler_on = action.is_on(),
        }

        if hits(self.config.drop_every, self.commands) {
            return Some(PlugReply::Drop);
        }
        Some(PlugReply::Publish(CommandResult {
            endpoint: endpoint.to_string(),
            action,
            success: true,
            error: None,
        }))
    }

    fn role_for(&self, endpoint: &str) -> Option<ApplianceRole> {
        if endpoint == self.config.heater_endpoint {
            Some(ApplianceRole::Heater)
        } else if endpoint == self.config.cooler_endpoint {
            Some(ApplianceRole::Cooler)
        } else {
            None
        }
    }
}

fn hits(every: Option<u32>, count: u32) -> bool {
    every.is_some_and(|n| n > 0 && count % n == 0)
}
