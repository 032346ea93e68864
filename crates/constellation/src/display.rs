//! Terminal status board fed by the orchestrator's event stream

use crate::runtime::{ServiceState, StateChangeEvent};
use crossterm::style::{Color, Stylize};
use indexmap::IndexMap;

/// Human label of a state
pub fn label(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Dead => "dead",
        ServiceState::Started => "started",
        ServiceState::Running => "running",
        ServiceState::Finished => "finished",
        ServiceState::Failed => "failed",
    }
}

/// Indicator colour of a state
pub fn color(state: ServiceState) -> Color {
    match state {
        ServiceState::Dead => Color::DarkGrey,
        ServiceState::Started => Color::Yellow,
        ServiceState::Running => Color::Green,
        ServiceState::Finished => Color::White,
        ServiceState::Failed => Color::Red,
    }
}

/// One status line: coloured marker, name and label
pub fn status_line(name: &str, state: ServiceState) -> String {
    format!("{} {} ({})", "●".with(color(state)), name, label(state))
}

/// Last known state of every service, in display order
#[derive(Debug, Clone)]
pub struct StatusBoard {
    services: IndexMap<String, ServiceState>,
}

impl StatusBoard {
    /// Every service starts out `Dead`
    pub fn new(services: &[String]) -> Self {
        Self {
            services: services
                .iter()
                .map(|name| (name.clone(), ServiceState::Dead))
                .collect(),
        }
    }

    /// Record a transition and return the line to show for it
    pub fn apply(&mut self, event: &StateChangeEvent) -> String {
        match self.services.get_mut(&event.service) {
            Some(state) => *state = event.current,
            None => log::warn!("[{}] Event for a service not on the board", event.service),
        }

        let mut line = status_line(&event.service, event.current);
        if let Some(reason) = &event.reason {
            line.push_str(&format!(": {}", reason));
        }
        line
    }

    pub fn state(&self, name: &str) -> Option<ServiceState> {
        self.services.get(name).copied()
    }

    /// Whether every service reached a terminal state
    pub fn all_terminal(&self) -> bool {
        self.services.values().all(ServiceState::is_terminal)
    }

    /// Summary of every service, one line each
    pub fn render(&self) -> String {
        self.services
            .iter()
            .map(|(name, state)| status_line(name, *state))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FailureReason;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_board_starts_dead() {
        let board = StatusBoard::new(&names(&["db", "api"]));
        assert_eq!(board.state("db"), Some(ServiceState::Dead));
        assert_eq!(board.state("api"), Some(ServiceState::Dead));
        assert!(!board.all_terminal());

        let rendered = board.render();
        let lines: Vec<_> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("db (dead)"));
        assert!(lines[1].contains("api (dead)"));
    }

    #[test]
    fn test_apply_tracks_latest_state() {
        let mut board = StatusBoard::new(&names(&["db"]));

        board.apply(&StateChangeEvent::new(
            "db",
            ServiceState::Dead,
            ServiceState::Started,
        ));
        let line = board.apply(
            &StateChangeEvent::new("db", ServiceState::Started, ServiceState::Failed)
                .with_reason(FailureReason::ExitCode(1)),
        );

        assert_eq!(board.state("db"), Some(ServiceState::Failed));
        assert!(line.contains("db (failed)"));
        assert!(line.ends_with("exited with code 1"));
        assert!(board.all_terminal());
    }

    #[test]
    fn test_labels_are_distinct() {
        let states = [
            ServiceState::Dead,
            ServiceState::Started,
            ServiceState::Running,
            ServiceState::Finished,
            ServiceState::Failed,
        ];
        let mut labels: Vec<_> = states.iter().map(|s| label(*s)).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), states.len());
    }
}
