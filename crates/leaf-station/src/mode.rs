use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeState {
    #[default]
    Manual,
    Automatic,
}

impl ModeState {
    pub fn is_automatic(self) -> bool {
        self == ModeState::Automatic
    }
}

/// Manual/Automatic switch. Every transition is legal.
#[derive(Debug, Clone, Default)]
pub struct ModeController {
    state: ModeState,
}

impl ModeController {
    pub fn state(&self) -> ModeState {
        self.state
    }

    pub fn toggle(&mut self) -> ModeState {
        self.state = match self.state {
            ModeState::Manual => ModeState::Automatic,
            ModeState::Automatic => ModeState::Manual,
        };
        self.state
    }

    pub fn reset(&mut self) {
        self.state = ModeState::Manual;
    }
}
