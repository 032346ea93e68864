//! Test helpers for orchestration tests

#![allow(dead_code)]

use constellation::{EventStream, Orchestrator, ServiceState, StateChangeEvent};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;

/// Upper bound for any single test scenario
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(10);

/// Register a service running `script` through `sh -c`
pub fn sh_service(
    orchestrator: &mut Orchestrator,
    name: &str,
    script: &str,
    pattern: Option<&str>,
    requirements: &[&str],
) {
    orchestrator
        .register(
            name,
            "sh",
            vec!["-c".to_string(), script.to_string()],
            pattern,
            requirements.iter().map(|r| r.to_string()).collect(),
        )
        .unwrap();
}

/// Receive events until `done` returns true for one of them
pub async fn collect_until<F>(events: &mut EventStream, mut done: F) -> Vec<StateChangeEvent>
where
    F: FnMut(&StateChangeEvent) -> bool,
{
    let mut collected = Vec::new();
    let result = timeout(SCENARIO_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            let finished = done(&event);
            collected.push(event);
            if finished {
                return;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "Timeout waiting for events, got {:?}", collected);
    collected
}

/// Receive events until the stream ends
pub async fn collect_all(events: &mut EventStream) -> Vec<StateChangeEvent> {
    collect_until(events, |_| false).await
}

/// Compact `(service, from, to)` view of events
pub fn transitions(events: &[StateChangeEvent]) -> Vec<(String, ServiceState, ServiceState)> {
    events
        .iter()
        .map(|e| (e.service.clone(), e.previous, e.current))
        .collect()
}

/// States visited by one service, starting from `Dead`
pub fn path_of(events: &[StateChangeEvent], service: &str) -> Vec<ServiceState> {
    let mut path = vec![ServiceState::Dead];
    path.extend(
        events
            .iter()
            .filter(|e| e.service == service)
            .map(|e| e.current),
    );
    path
}

/// Every service's events chain from `Dead`, follow the state machine and
/// stop at the first terminal state
pub fn assert_well_formed(events: &[StateChangeEvent]) {
    let mut current: HashMap<&str, ServiceState> = HashMap::new();
    for event in events {
        let state = current.entry(event.service.as_str()).or_default();
        assert_eq!(
            *state, event.previous,
            "event {} does not continue from {}",
            event, state
        );
        assert!(
            state.can_transition_to(event.current),
            "invalid transition in {}",
            event
        );
        *state = event.current;
    }
}

/// Position of the first event matching `(service, to)`
pub fn position(events: &[StateChangeEvent], service: &str, to: ServiceState) -> usize {
    events
        .iter()
        .position(|e| e.service == service && e.current == to)
        .unwrap_or_else(|| panic!("no {} -> {} in {:?}", service, to, transitions(events)))
}
