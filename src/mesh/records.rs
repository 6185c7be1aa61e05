//! Plain records exchanged when building or inspecting a mesh.

use serde::{Deserialize, Serialize};

/// Element shape family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ElementShape {
    Solid,
    Shell,
    Beam,
    Point,
    #[default]
    Unknown,
}

impl ElementShape {
    /// Integer code used in the `elshape` property field.
    pub fn code(self) -> i32 {
        match self {
            ElementShape::Solid => 1,
            ElementShape::Shell => 2,
            ElementShape::Beam => 3,
            ElementShape::Point => 4,
            ElementShape::Unknown => 0,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ElementShape::Solid,
            2 => ElementShape::Shell,
            3 => ElementShape::Beam,
            4 => ElementShape::Point,
            _ => ElementShape::Unknown,
        }
    }

    /// Shape implied by a node count when none is given.
    pub fn guess(n_nodes: usize) -> Self {
        match n_nodes {
            1 => ElementShape::Point,
            2 | 3 => ElementShape::Beam,
            4 => ElementShape::Shell,
            n if n > 4 => ElementShape::Solid,
            _ => ElementShape::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i32,
    pub coordinates: [f64; 3],
}

impl NodeRecord {
    pub fn new(id: i32, coordinates: [f64; 3]) -> Self {
        Self { id, coordinates }
    }
}

/// Element with its connectivity given as node indices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ElementRecord {
    pub id: i32,
    pub shape: ElementShape,
    pub connectivity: Vec<i32>,
}

impl ElementRecord {
    pub fn new(id: i32, shape: ElementShape, connectivity: Vec<i32>) -> Self {
        Self { id, shape, connectivity }
    }
}

/// Which element families a mesh contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyFlags {
    pub has_solid: bool,
    pub has_shell: bool,
    pub has_beam: bool,
    pub has_point: bool,
}

impl TopologyFlags {
    pub fn from_shapes(shapes: impl IntoIterator<Item = ElementShape>) -> Self {
        shapes.into_iter().fold(Self::default(), |mut f, s| {
            match s {
                ElementShape::Solid => f.has_solid = true,
                ElementShape::Shell => f.has_shell = true,
                ElementShape::Beam => f.has_beam = true,
                ElementShape::Point => f.has_point = true,
                ElementShape::Unknown => {}
            }
            f
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_codes_round_trip() {
        for s in [ElementShape::Solid, ElementShape::Shell, ElementShape::Beam, ElementShape::Point] {
            assert_eq!(ElementShape::from_code(s.code()), s);
        }
        assert_eq!(ElementShape::from_code(42), ElementShape::Unknown);
    }

    #[test]
    fn flags_follow_shapes() {
        let f = TopologyFlags::from_shapes([ElementShape::Shell, ElementShape::Point]);
        assert!(f.has_shell && f.has_point);
        assert!(!f.has_solid && !f.has_beam);
    }
}
