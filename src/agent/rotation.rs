use crate::model::Location;

/// Round-robin cursor over the fixed location set.
#[derive(Debug, Clone)]
pub struct Rotation {
    locations: Vec<Location>,
    position: usize,
}

impl Rotation {
    /// Returns `None` when there is nothing to rotate over.
    pub fn new(locations: Vec<Location>) -> Option<Self> {
        if locations.is_empty() {
            return None;
        }

        Some(Self { locations, position: 0 })
    }

    pub fn next_location(&mut self) -> &Location {
        let index = self.position % self.locations.len();
        self.position = self.position.wrapping_add(1);
        &self.locations[index]
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
