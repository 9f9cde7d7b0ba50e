//! Consumer lifecycle as a pure transition table.

use std::fmt;

/// Lifecycle state of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsumerStatus {
    Down,
    GoingUp,
    Up,
    Consuming,
    GoingDown,
}

/// Everything that can move a consumer between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Run,
    /// First heartbeat written.
    Started,
    Claimed,
    /// Handler outcome (or expiry) fully disposed of.
    Finished,
    Stop,
    GcHalted,
    HeartbeatHalted,
    Fault,
}

impl ConsumerStatus {
    /// A consumer is running until it starts going down.
    pub fn is_running(self) -> bool {
        !matches!(self, ConsumerStatus::Down | ConsumerStatus::GoingDown)
    }
}

impl fmt::Display for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerStatus::Down => "down",
            ConsumerStatus::GoingUp => "going_up",
            ConsumerStatus::Up => "up",
            ConsumerStatus::Consuming => "consuming",
            ConsumerStatus::GoingDown => "going_down",
        };
        f.write_str(name)
    }
}

/// The state `input` leads to from `status`, or `None` when the input has
/// no effect there.
pub fn next_status(status: ConsumerStatus, input: Input) -> Option<ConsumerStatus> {
    use ConsumerStatus::*;

    match (status, input) {
        (_, Input::Fault) => Some(Down),
        (Down, Input::Run) => Some(GoingUp),
        (GoingUp, Input::Started) => Some(Up),
        (Up, Input::Claimed) => Some(Consuming),
        (Consuming, Input::Finished) => Some(Up),
        (GoingUp | Up | Consuming, Input::Stop) => Some(GoingDown),
        // An in-flight message finishing after stop does not resume work.
        (GoingDown, Input::Finished | Input::GcHalted) => Some(GoingDown),
        (GoingDown, Input::HeartbeatHalted) => Some(Down),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::ConsumerStatus::*;
    use super::*;

    const ALL: [ConsumerStatus; 5] = [Down, GoingUp, Up, Consuming, GoingDown];
    const INPUTS: [Input; 8] = [
        Input::Run,
        Input::Started,
        Input::Claimed,
        Input::Finished,
        Input::Stop,
        Input::GcHalted,
        Input::HeartbeatHalted,
        Input::Fault,
    ];

    #[test]
    fn happy_path_cycle() {
        let mut s = Down;
        for input in [
            Input::Run,
            Input::Started,
            Input::Claimed,
            Input::Finished,
            Input::Claimed,
            Input::Stop,
            Input::Finished,
            Input::GcHalted,
            Input::HeartbeatHalted,
        ] {
            s = next_status(s, input).unwrap_or_else(|| panic!("{input:?} rejected in {s}"));
        }
        assert_eq!(s, Down);
    }

    #[test]
    fn run_only_effective_from_down() {
        for s in ALL {
            let expected = (s == Down).then_some(GoingUp);
            assert_eq!(next_status(s, Input::Run), expected, "run from {s}");
        }
    }

    #[test]
    fn stop_ignored_when_not_running() {
        assert_eq!(next_status(Down, Input::Stop), None);
        assert_eq!(next_status(GoingDown, Input::Stop), None);
        assert_eq!(next_status(GoingUp, Input::Stop), Some(GoingDown));
    }

    #[test]
    fn claims_only_from_up() {
        for s in ALL {
            let expected = (s == Up).then_some(Consuming);
            assert_eq!(next_status(s, Input::Claimed), expected, "claim from {s}");
        }
    }

    #[test]
    fn fault_always_lands_down() {
        for s in ALL {
            assert_eq!(next_status(s, Input::Fault), Some(Down));
        }
    }

    #[test]
    fn only_heartbeat_halt_completes_shutdown() {
        for input in INPUTS {
            let next = next_status(GoingDown, input);
            if next == Some(Down) {
                assert!(matches!(input, Input::HeartbeatHalted | Input::Fault));
            }
        }
    }

    #[test]
    fn running_flag() {
        assert!(!Down.is_running());
        assert!(!GoingDown.is_running());
        assert!(GoingUp.is_running());
        assert!(Up.is_running());
        assert!(Consuming.is_running());
    }
}
