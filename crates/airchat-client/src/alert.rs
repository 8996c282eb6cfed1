//! Title alert: alternates the page title while unseen messages wait and
//! the page is not focused.

use std::time::Duration;

pub const TITLE: &str = "aIRChat";
pub const ALERT_TITLE: &str = "[!!] aIRChat [!!]";
/// How often the presentation layer should call [`TitleAlert::tick`].
pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleAlert {
    running: bool,
    showing_alert: bool,
}

impl TitleAlert {
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Begin alternating. Starting a running alert changes nothing.
    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.showing_alert = false;
    }

    /// Advance one period and return the title to show.
    pub fn tick(&mut self) -> &'static str {
        if self.running {
            self.showing_alert = !self.showing_alert;
        }
        self.title()
    }

    pub fn title(&self) -> &'static str {
        if self.showing_alert { ALERT_TITLE } else { TITLE }
    }
}
