//! Application Working Mode (AWM): a named point in an EXC's configuration
//! space.

use knhk_resources::{ResourceAssignment, ResourcePath};

#[derive(Debug, Clone)]
pub struct WorkingMode {
    pub id: u32,
    pub value: f64,
    pub requested: Vec<ResourceAssignment>,
    /// True once the accounter has reported this AWM's request as
    /// infeasible against current totals — policies should skip it.
    pub hidden: bool,
}

impl WorkingMode {
    pub fn new(id: u32, value: f64, requested: Vec<ResourceAssignment>) -> Self {
        Self {
            id,
            value,
            requested,
            hidden: false,
        }
    }

    /// The concrete resource set this AWM is bound to, used to detect
    /// migration across a rescheduling (same AWM id, different bindings).
    pub fn bound_resource_paths(&self) -> Vec<ResourcePath> {
        let mut paths: Vec<ResourcePath> = self
            .requested
            .iter()
            .flat_map(|a| a.bound_resources().to_vec())
            .collect();
        paths.sort();
        paths
    }

    /// True when `other` books exactly the same resources in exactly the
    /// same amounts as `self`. A RECONF between two such AWMs only
    /// relabels the working mode id/value; nothing about what's actually
    /// allocated changes.
    pub fn requests_same_resources_as(&self, other: &WorkingMode) -> bool {
        let mut mine: Vec<(Vec<ResourcePath>, u64)> = self
            .requested
            .iter()
            .map(|a| (a.bound_resources().to_vec(), a.amount))
            .collect();
        let mut theirs: Vec<(Vec<ResourcePath>, u64)> = other
            .requested
            .iter()
            .map(|a| (a.bound_resources().to_vec(), a.amount))
            .collect();
        mine.sort();
        theirs.sort();
        mine == theirs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knhk_resources::ResourcePath;

    fn path(s: &str) -> ResourcePath {
        ResourcePath::parse(s).unwrap()
    }

    #[test]
    fn bound_resource_paths_are_order_independent() {
        let mut a1 = ResourceAssignment::new(path("sys.cpu.pe"), 10);
        a1.bind(vec![path("sys0.cpu0.pe1"), path("sys0.cpu0.pe0")]);
        let mut a2 = ResourceAssignment::new(path("sys.cpu.pe"), 10);
        a2.bind(vec![path("sys0.cpu0.pe0"), path("sys0.cpu0.pe1")]);

        let w1 = WorkingMode::new(0, 1.0, vec![a1]);
        let w2 = WorkingMode::new(0, 1.0, vec![a2]);
        assert_eq!(w1.bound_resource_paths(), w2.bound_resource_paths());
    }
}
