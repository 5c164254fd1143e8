use log::{debug, info, warn};

/// Component-scoped logger; every message carries the component name.
#[derive(Debug, Clone, Copy)]
pub struct LogManager {
    component: &'static str,
}

impl LogManager {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn record(&self, message: &str) {
        info!("[{}] {}", self.component, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("[{}] {}", self.component, message);
    }

    pub fn detail(&self, message: &str) {
        debug!("[{}] {}", self.component, message);
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new("ct1")
    }
}
