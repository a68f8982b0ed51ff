//! Session history with restoration identifiers and scroll data.

use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_core::fresh_uid;
use tr_net::Location;

/// How a visit writes its location into history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMethod {
    Push,
    Replace,
}

/// State object stored with each history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryState {
    pub turbo: TurboState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurboState {
    pub restoration_identifier: String,
    pub restoration_index: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollPosition {
    pub x: f64,
    pub y: f64,
}

impl ScrollPosition {
    pub const TOP: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Per-entry data kept in memory, keyed by restoration identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestorationData {
    pub scroll_position: Option<ScrollPosition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub location: Location,
    /// JSON-serialized [`HistoryState`].
    pub state: String,
}

impl HistoryEntry {
    pub fn turbo_state(&self) -> DriveResult<HistoryState> {
        serde_json::from_str(&self.state).map_err(|error| {
            DriveError::new(
                "history.state_invalid",
                format!("history state for {} is unreadable: {error}", self.location),
            )
        })
    }
}

/// Direction of travel relative to the current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryDirection {
    Forward,
    Back,
}

/// What a traversal landed on, as a `popstate` would report it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPop {
    pub location: Location,
    pub restoration_identifier: String,
    pub direction: HistoryDirection,
}

#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<HistoryEntry>,
    current: usize,
    restoration_identifier: String,
    restoration_index: u64,
    restoration_data: HashMap<String, RestorationData>,
}

impl History {
    /// History whose only entry is the initially loaded page.
    pub fn new(location: Location) -> DriveResult<Self> {
        let restoration_identifier = fresh_uid();
        let state = encode_state(&restoration_identifier, 0)?;
        Ok(Self {
            entries: vec![HistoryEntry { location, state }],
            current: 0,
            restoration_identifier,
            restoration_index: 0,
            restoration_data: HashMap::new(),
        })
    }

    pub fn push(&mut self, location: Location, restoration_identifier: &str) -> DriveResult<()> {
        self.update(HistoryMethod::Push, location, restoration_identifier)
    }

    pub fn replace(&mut self, location: Location, restoration_identifier: &str) -> DriveResult<()> {
        self.update(HistoryMethod::Replace, location, restoration_identifier)
    }

    /// Writes a new entry (push) or overwrites the current one (replace).
    /// Pushing assigns the next restoration index and drops forward entries.
    pub fn update(
        &mut self,
        method: HistoryMethod,
        location: Location,
        restoration_identifier: &str,
    ) -> DriveResult<()> {
        let index = match method {
            HistoryMethod::Push => self.restoration_index.saturating_add(1),
            HistoryMethod::Replace => self.restoration_index,
        };
        let entry = HistoryEntry {
            location,
            state: encode_state(restoration_identifier, index)?,
        };

        match method {
            HistoryMethod::Push => {
                self.entries.truncate(self.current.saturating_add(1));
                self.entries.push(entry);
                self.current = self.entries.len() - 1;
            }
            HistoryMethod::Replace => {
                if let Some(slot) = self.entries.get_mut(self.current) {
                    *slot = entry;
                }
            }
        }

        self.restoration_identifier = restoration_identifier.to_owned();
        self.restoration_index = index;
        Ok(())
    }

    /// Moves `delta` entries; `None` when that leaves the history.
    pub fn go(&mut self, delta: isize) -> DriveResult<Option<HistoryPop>> {
        let Some(target) = self.current.checked_add_signed(delta) else {
            return Ok(None);
        };
        let Some(entry) = self.entries.get(target) else {
            return Ok(None);
        };
        if target == self.current {
            return Ok(None);
        }

        let state = entry.turbo_state()?;
        let direction = if state.turbo.restoration_index > self.restoration_index {
            HistoryDirection::Forward
        } else {
            HistoryDirection::Back
        };
        let location = entry.location.clone();

        self.current = target;
        self.restoration_identifier = state.turbo.restoration_identifier.clone();
        self.restoration_index = state.turbo.restoration_index;

        Ok(Some(HistoryPop {
            location,
            restoration_identifier: state.turbo.restoration_identifier,
            direction,
        }))
    }

    pub fn back(&mut self) -> DriveResult<Option<HistoryPop>> {
        self.go(-1)
    }

    pub fn forward(&mut self) -> DriveResult<Option<HistoryPop>> {
        self.go(1)
    }

    pub fn location(&self) -> Option<&Location> {
        self.entries.get(self.current).map(|entry| &entry.location)
    }

    pub fn restoration_identifier(&self) -> &str {
        &self.restoration_identifier
    }

    pub fn restoration_index(&self) -> u64 {
        self.restoration_index
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn restoration_data(&self, restoration_identifier: &str) -> Option<&RestorationData> {
        self.restoration_data.get(restoration_identifier)
    }

    /// Overwrites the scroll position stored for the current entry.
    pub fn record_scroll(&mut self, position: ScrollPosition) {
        let key = self.restoration_identifier.clone();
        self.restoration_data.entry(key).or_default().scroll_position = Some(position);
    }
}

fn encode_state(restoration_identifier: &str, restoration_index: u64) -> DriveResult<String> {
    let state = HistoryState {
        turbo: TurboState {
            restoration_identifier: restoration_identifier.to_owned(),
            restoration_index,
        },
    };
    serde_json::to_string(&state).map_err(|error| {
        DriveError::new(
            "history.state_invalid",
            format!("failed to encode history state: {error}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::History;
    use super::HistoryDirection;
    use super::ScrollPosition;
    use tr_net::Location;

    fn location(path: &str) -> Location {
        match Location::parse(&format!("https://example.com{path}")) {
            Ok(location) => location,
            Err(error) => panic!("{error}"),
        }
    }

    fn history() -> History {
        match History::new(location("/")) {
            Ok(history) => history,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn pushes_assign_monotonic_indices_and_replaces_keep_them() {
        let mut history = history();
        for (path, id) in [("/a", "r1"), ("/b", "r2")] {
            if let Err(error) = history.push(location(path), id) {
                panic!("{error}");
            }
        }
        assert_eq!(history.restoration_index(), 2);
        if let Err(error) = history.replace(location("/b2"), "r3") {
            panic!("{error}");
        }
        assert_eq!(history.restoration_index(), 2);
        assert_eq!(history.entries().len(), 3);
        assert_eq!(history.location().map(Location::as_str), Some("https://example.com/b2"));

        let state = match history.entries()[2].turbo_state() {
            Ok(state) => state,
            Err(error) => panic!("{error}"),
        };
        assert_eq!(state.turbo.restoration_identifier, "r3");
        assert!(history.entries()[2].state.contains("\"restorationIndex\":2"));
    }

    #[test]
    fn traversal_reports_direction_and_restoration_id() {
        let mut history = history();
        if let Err(error) = history.push(location("/a"), "ra") {
            panic!("{error}");
        }
        let popped = match history.back() {
            Ok(Some(popped)) => popped,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(popped.direction, HistoryDirection::Back);
        assert_eq!(popped.location, location("/"));

        let forward = match history.forward() {
            Ok(Some(popped)) => popped,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(forward.direction, HistoryDirection::Forward);
        assert_eq!(forward.restoration_identifier, "ra");
        assert!(matches!(history.forward(), Ok(None)));
    }

    #[test]
    fn pushing_after_going_back_drops_forward_entries() {
        let mut history = history();
        let steps = [("/a", "ra"), ("/b", "rb")];
        for (path, id) in steps {
            if let Err(error) = history.push(location(path), id) {
                panic!("{error}");
            }
        }
        if let Err(error) = history.back() {
            panic!("{error}");
        }
        if let Err(error) = history.push(location("/c"), "rc") {
            panic!("{error}");
        }
        let paths: Vec<&str> = history
            .entries()
            .iter()
            .map(|entry| entry.location.path())
            .collect();
        assert_eq!(paths, vec!["/", "/a", "/c"]);
        assert_eq!(history.restoration_index(), 2);
    }

    #[test]
    fn scroll_positions_are_kept_per_restoration_id() {
        let mut history = history();
        let first = history.restoration_identifier().to_owned();
        history.record_scroll(ScrollPosition::new(0.0, 120.0));
        if let Err(error) = history.push(location("/a"), "ra") {
            panic!("{error}");
        }
        history.record_scroll(ScrollPosition::new(0.0, 40.0));
        history.record_scroll(ScrollPosition::new(0.0, 60.0));

        assert_eq!(
            history.restoration_data(&first).and_then(|data| data.scroll_position),
            Some(ScrollPosition::new(0.0, 120.0))
        );
        assert_eq!(
            history.restoration_data("ra").and_then(|data| data.scroll_position),
            Some(ScrollPosition::new(0.0, 60.0))
        );
    }
}
