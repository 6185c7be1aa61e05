//! MeshedRegion: nodes, elements, faces, named selections and properties.
//!
//! Bulk construction goes through appenders: [`MeshedRegion::add_nodes`]
//! and [`MeshedRegion::add_elements`] hand out `n` placeholders that are
//! filled locally and sent in one call by `commit`. The engine validates the
//! whole batch before applying it, so a batch lands entirely or not at all.
//! Dropping an appender without committing leaves the mesh unchanged.

pub mod records;

pub use records::{ElementRecord, ElementShape, NodeRecord, TopologyFlags};

use crate::data::scoping::to_i32;
use crate::data::{Field, FieldBase, PropertyField, Scoping};
use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, DynObject, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, MeshCall, Primitive, Reply, Value};
use std::ops::{Index, IndexMut};

/// Semantic names of the mesh property fields.
pub mod property_names {
    pub const COORDINATES: &str = "coordinates";
    pub const CONNECTIVITY: &str = "connectivity";
    pub const ELEMENT_TYPE: &str = "eltype";
    pub const ELEMENT_SHAPE: &str = "elshape";
    pub const FACES_NODES_CONNECTIVITY: &str = "faces_nodes_connectivity";
    pub const ELEMENTS_FACES_CONNECTIVITY: &str = "elements_faces_connectivity";
    pub const ELEMENTS_FACES_REVERSED: &str = "elements_faces_reversed";
    pub const FACES_TYPE: &str = "faces_type";
}

#[derive(Debug)]
pub struct MeshedRegion {
    handle: ObjectHandle,
}

dpf_object!(MeshedRegion, EntityKind::MeshedRegion);

impl MeshedRegion {
    /// Empty mesh; the counts only pre-reserve engine storage.
    pub fn new(num_nodes: usize, num_elements: usize, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(
                &server,
                Call::Mesh(MeshCall::New {
                    num_nodes: to_i32(num_nodes)?,
                    num_elements: to_i32(num_elements)?,
                }),
            )?,
        })
    }

    fn call(&self, call: MeshCall) -> Result<Reply, DpfError> {
        self.handle.call(Call::Mesh(call))
    }

    fn object<T: DpfObject>(&self, call: MeshCall) -> Result<T, DpfError> {
        let raw = self.call(call)?.into_object()?;
        T::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }

    pub fn num_nodes(&self) -> Result<usize, DpfError> {
        self.call(MeshCall::NumNodes { obj: self.handle.id() })?.into_count()
    }

    pub fn num_elements(&self) -> Result<usize, DpfError> {
        self.call(MeshCall::NumElements { obj: self.handle.id() })?.into_count()
    }

    pub fn num_faces(&self) -> Result<usize, DpfError> {
        self.call(MeshCall::NumFaces { obj: self.handle.id() })?.into_count()
    }

    pub fn unit(&self) -> Result<String, DpfError> {
        self.call(MeshCall::Unit { obj: self.handle.id() })?.into_text()
    }

    pub fn set_unit(&self, unit: &str) -> Result<(), DpfError> {
        self.call(MeshCall::SetUnit {
            obj: self.handle.id(),
            unit: unit.to_string(),
        })?
        .into_unit()
    }

    /// Names accepted by [`property`](Self::property).
    pub fn available_property_names(&self) -> Result<Vec<String>, DpfError> {
        self.call(MeshCall::PropertyNames { obj: self.handle.id() })?
            .into_strings()
    }

    /// Property field by semantic name, see [`property_names`].
    ///
    /// # Errors
    /// `NotFound` for an unknown name, `TypeMismatch` if the property is not
    /// a `T`.
    pub fn property<T: DpfObject>(&self, name: &str) -> Result<T, DpfError> {
        let raw = self
            .call(MeshCall::Property {
                obj: self.handle.id(),
                name: name.to_string(),
            })?
            .into_object()?;
        DynObject::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))?.cast()
    }

    pub fn set_property<F: FieldBase>(&self, name: &str, field: &F) -> Result<(), DpfError> {
        self.handle.ensure_same_server(field.handle())?;
        self.call(MeshCall::SetProperty {
            obj: self.handle.id(),
            name: name.to_string(),
            field: field.object_id(),
        })?
        .into_unit()
    }

    /// Nodal 3-component coordinates field.
    pub fn coordinates(&self) -> Result<Field, DpfError> {
        self.property(property_names::COORDINATES)
    }

    /// Node indices per element, with a data pointer.
    pub fn connectivity(&self) -> Result<PropertyField, DpfError> {
        self.property(property_names::CONNECTIVITY)
    }

    pub fn element_types(&self) -> Result<PropertyField, DpfError> {
        self.property(property_names::ELEMENT_TYPE)
    }

    pub fn element_shapes(&self) -> Result<PropertyField, DpfError> {
        self.property(property_names::ELEMENT_SHAPE)
    }

    pub fn nodes_scoping(&self) -> Result<Scoping, DpfError> {
        self.object(MeshCall::NodesScoping { obj: self.handle.id() })
    }

    pub fn elements_scoping(&self) -> Result<Scoping, DpfError> {
        self.object(MeshCall::ElementsScoping { obj: self.handle.id() })
    }

    pub fn faces_scoping(&self) -> Result<Scoping, DpfError> {
        self.object(MeshCall::FacesScoping { obj: self.handle.id() })
    }

    /// Named selection names, in insertion order.
    pub fn named_selections(&self) -> Result<Vec<String>, DpfError> {
        self.call(MeshCall::NamedSelections { obj: self.handle.id() })?
            .into_strings()
    }

    pub fn named_selection(&self, name: &str) -> Result<Scoping, DpfError> {
        self.object(MeshCall::NamedSelection {
            obj: self.handle.id(),
            name: name.to_string(),
        })
    }

    pub fn named_selection_by_index(&self, index: usize) -> Result<Scoping, DpfError> {
        let names = self.named_selections()?;
        let name = names.get(index).ok_or_else(|| {
            DpfError::OutOfRange(format!("named selection {index} of {}", names.len()))
        })?;
        self.named_selection(name)
    }

    pub fn set_named_selection(&self, name: &str, scoping: &Scoping) -> Result<(), DpfError> {
        self.handle.ensure_same_server(scoping.handle())?;
        self.call(MeshCall::SetNamedSelection {
            obj: self.handle.id(),
            name: name.to_string(),
            scoping: scoping.object_id(),
        })?
        .into_unit()
    }

    /// `n` node placeholders, applied by [`NodesAppender::commit`].
    pub fn add_nodes(&self, n: usize) -> NodesAppender<'_> {
        NodesAppender {
            mesh: self,
            nodes: vec![NodeRecord::default(); n],
        }
    }

    /// `n` element placeholders, applied by [`ElementsAppender::commit`].
    pub fn add_elements(&self, n: usize) -> ElementsAppender<'_> {
        ElementsAppender {
            mesh: self,
            elements: vec![ElementRecord::default(); n],
        }
    }

    /// Single-node shortcut for `add_nodes(1)`.
    pub fn add_node(&self, id: i32, coordinates: [f64; 3]) -> Result<(), DpfError> {
        let mut a = self.add_nodes(1);
        a[0] = NodeRecord::new(id, coordinates);
        a.commit()
    }

    /// Single-element shortcut; connectivity holds node indices.
    pub fn add_element(&self, id: i32, shape: ElementShape, connectivity: &[i32]) -> Result<(), DpfError> {
        let mut a = self.add_elements(1);
        a[0] = ElementRecord::new(id, shape, connectivity.to_vec());
        a.commit()
    }

    pub fn topology_flags(&self) -> Result<TopologyFlags, DpfError> {
        self.call(MeshCall::TopologyFlags { obj: self.handle.id() })?
            .into_topology_flags()
    }

    pub fn node_coordinates(&self, index: usize) -> Result<[f64; 3], DpfError> {
        match self
            .call(MeshCall::NodeCoordinates {
                obj: self.handle.id(),
                index: to_i32(index)?,
            })?
            .into_value()?
        {
            Value::Primitive(Primitive::Doubles(c)) if c.len() == 3 => Ok([c[0], c[1], c[2]]),
            other => Err(DpfError::protocol(format!("expected 3 coordinates, got {other:?}"))),
        }
    }

    /// Node indices of element `index`.
    pub fn element_connectivity(&self, index: usize) -> Result<Vec<i32>, DpfError> {
        match self
            .call(MeshCall::ElementConnectivity {
                obj: self.handle.id(),
                index: to_i32(index)?,
            })?
            .into_value()?
        {
            Value::Primitive(Primitive::Ints(c)) => Ok(c),
            other => Err(DpfError::protocol(format!("expected connectivity, got {other:?}"))),
        }
    }

    pub fn element_shape(&self, index: usize) -> Result<ElementShape, DpfError> {
        let code = self
            .call(MeshCall::ElementShape {
                obj: self.handle.id(),
                index: to_i32(index)?,
            })?
            .into_int()?;
        Ok(i32::try_from(code).map_or(ElementShape::Unknown, ElementShape::from_code))
    }

    pub fn node_index_by_id(&self, id: i32) -> Result<Option<usize>, DpfError> {
        let i = self
            .call(MeshCall::NodeIndexById {
                obj: self.handle.id(),
                id,
            })?
            .into_int()?;
        Ok(usize::try_from(i).ok())
    }

    pub fn element_index_by_id(&self, id: i32) -> Result<Option<usize>, DpfError> {
        let i = self
            .call(MeshCall::ElementIndexById {
                obj: self.handle.id(),
                id,
            })?
            .into_int()?;
        Ok(usize::try_from(i).ok())
    }
}

/// Pending batch of nodes.
#[derive(Debug)]
#[must_use = "nodes are only added on commit"]
pub struct NodesAppender<'a> {
    mesh: &'a MeshedRegion,
    nodes: Vec<NodeRecord>,
}

impl NodesAppender<'_> {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, NodeRecord> {
        self.nodes.iter_mut()
    }

    /// Send the whole batch.
    ///
    /// # Errors
    /// `InvalidArgument` on duplicate ids; the mesh is unchanged then.
    pub fn commit(self) -> Result<(), DpfError> {
        self.mesh
            .call(MeshCall::AddNodes {
                obj: self.mesh.handle.id(),
                nodes: self.nodes,
            })?
            .into_unit()
    }
}

impl Index<usize> for NodesAppender<'_> {
    type Output = NodeRecord;

    fn index(&self, i: usize) -> &NodeRecord {
        &self.nodes[i]
    }
}

impl IndexMut<usize> for NodesAppender<'_> {
    fn index_mut(&mut self, i: usize) -> &mut NodeRecord {
        &mut self.nodes[i]
    }
}

/// Pending batch of elements.
#[derive(Debug)]
#[must_use = "elements are only added on commit"]
pub struct ElementsAppender<'a> {
    mesh: &'a MeshedRegion,
    elements: Vec<ElementRecord>,
}

impl ElementsAppender<'_> {
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ElementRecord> {
        self.elements.iter_mut()
    }

    /// Fill placeholder `i`.
    pub fn set(&mut self, i: usize, id: i32, shape: ElementShape, connectivity: &[i32]) {
        self.elements[i] = ElementRecord::new(id, shape, connectivity.to_vec());
    }

    /// Send the whole batch.
    ///
    /// # Errors
    /// `InvalidArgument` for a node index past the mesh nodes or a duplicate
    /// id; the mesh is unchanged then.
    pub fn commit(self) -> Result<(), DpfError> {
        self.mesh
            .call(MeshCall::AddElements {
                obj: self.mesh.handle.id(),
                elements: self.elements,
            })?
            .into_unit()
    }
}

impl Index<usize> for ElementsAppender<'_> {
    type Output = ElementRecord;

    fn index(&self, i: usize) -> &ElementRecord {
        &self.elements[i]
    }
}

impl IndexMut<usize> for ElementsAppender<'_> {
    fn index_mut(&mut self, i: usize) -> &mut ElementRecord {
        &mut self.elements[i]
    }
}
