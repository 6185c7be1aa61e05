//! Meshes, supports, result info and data sources.

use super::{count, index, require_kind, size_arg, with};
use crate::codec::Payload;
use crate::collection::label_space::LabelSpace;
use crate::data::field_definition::FieldDefinitionData;
use crate::data::field_info::FieldValueKind;
use crate::data::location::{Dimensionality, Location};
use crate::data_sources::{DataSourceEntry, default_key};
use crate::dpf_error::EngineFailure;
use crate::mesh::property_names::{CONNECTIVITY, COORDINATES, ELEMENT_SHAPE, ELEMENT_TYPE};
use crate::mesh::records::{ElementRecord, ElementShape, TopologyFlags};
use crate::support::cyclic::CyclicStage;
use crate::transport::call::{
    CyclicCall, DataSourcesCall, EntityKind, EntryKind, GenericSupportCall, MeshCall, ObjectId, Primitive, Reply,
    ResultInfoCall, TimeFreqCall, Value,
};
use crate::transport::loopback::EngineCore;
use crate::transport::loopback::store::{
    CollectionData, CyclicData, EngineObject, EngineResult, FieldData, GenericSupportData, MeshData, ScopingData,
    Shared, TimeFreqData, shared,
};
use std::collections::HashSet;

const DERIVED_PROPERTIES: [&str; 4] = [COORDINATES, CONNECTIVITY, ELEMENT_TYPE, ELEMENT_SHAPE];

/// Relative tolerance when looking a frequency up by value.
const FREQUENCY_TOLERANCE: f64 = 1e-6;

fn int_field(location: Location, ids: Vec<i32>, data: Vec<i32>) -> FieldData {
    FieldData::with_values(
        FieldValueKind::Int,
        FieldDefinitionData::new(location, Dimensionality::scalar()),
        ids,
        Payload::Int(data),
    )
}

/// `100 * shape + node count`.
fn element_type(e: &ElementRecord) -> i32 {
    100 * e.shape.code() + e.connectivity.len() as i32
}

/// Property field computed from the mesh records.
fn derived_property(mesh: &MeshData, name: &str) -> Option<FieldData> {
    let node_ids = || -> Vec<i32> { mesh.nodes.iter().map(|n| n.id).collect() };
    let element_ids = || -> Vec<i32> { mesh.elements.iter().map(|e| e.id).collect() };
    match name {
        COORDINATES => Some(FieldData::with_values(
            FieldValueKind::Double,
            FieldDefinitionData::new(Location::Nodal, Dimensionality::vector(3)).with_unit(mesh.unit.clone()),
            node_ids(),
            Payload::Double(mesh.nodes.iter().flat_map(|n| n.coordinates).collect()),
        )),
        CONNECTIVITY => {
            let mut f = int_field(
                Location::Elemental,
                element_ids(),
                mesh.elements.iter().flat_map(|e| e.connectivity.iter().copied()).collect(),
            );
            let mut offsets = Vec::with_capacity(mesh.elements.len());
            let mut offset = 0;
            for e in &mesh.elements {
                offsets.push(offset);
                offset += e.connectivity.len() as i32;
            }
            f.data_pointer = Some(offsets);
            Some(f)
        }
        ELEMENT_TYPE => Some(int_field(
            Location::Elemental,
            element_ids(),
            mesh.elements.iter().map(element_type).collect(),
        )),
        ELEMENT_SHAPE => Some(int_field(
            Location::Elemental,
            element_ids(),
            mesh.elements.iter().map(|e| e.shape.code()).collect(),
        )),
        _ => None,
    }
}

/// `(step id, values)` of a frequencies field. Without ids every value is
/// its own step, numbered from 1.
fn steps(field: &Shared) -> EngineResult<Vec<(i32, Vec<f64>)>> {
    with!(field.clone(), Field, "a frequencies field", |f| {
        let values = f
            .doubles()
            .ok_or_else(|| EngineFailure::type_mismatch("frequencies must be stored as doubles"))?
            .to_vec();
        let ids = f.ids();
        if ids.is_empty() {
            return Ok(values.into_iter().enumerate().map(|(i, v)| (i as i32 + 1, vec![v])).collect());
        }
        let mut out = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let range = f.entity_range(i, ids.len())?;
            out.push((*id, values[range].to_vec()));
        }
        Ok(out)
    })
}

fn stage(c: &CyclicData, s: i32) -> EngineResult<&CyclicStage> {
    index(s, c.stages.len(), "stage").map(|i| &c.stages[i])
}

/// Ids of base entity `id` in each requested sector: `id + sector * max_base_id`.
fn expand(stage: &CyclicStage, base: &[i32], id: i32, sectors: Option<Vec<i32>>) -> EngineResult<Vec<i32>> {
    if !base.contains(&id) {
        return Err(EngineFailure::not_found(format!("{id} is not a base-sector id")));
    }
    let max = base.iter().copied().max().unwrap_or(0);
    let sectors = sectors
        .or_else(|| stage.sectors_for_expansion.clone())
        .unwrap_or_else(|| (0..stage.num_sectors).collect());
    sectors
        .into_iter()
        .map(|s| {
            if !(0..stage.num_sectors).contains(&s) {
                return Err(EngineFailure::out_of_range(format!(
                    "sector {s} outside 0..{}",
                    stage.num_sectors
                )));
            }
            s.checked_mul(max)
                .and_then(|o| o.checked_add(id))
                .ok_or_else(|| EngineFailure::invalid(format!("expanded id of {id} in sector {s} overflows")))
        })
        .collect()
}

impl EngineCore {
    pub(in crate::transport::loopback) fn mesh(&self, call: MeshCall) -> EngineResult<Reply> {
        match call {
            MeshCall::New { num_nodes, num_elements } => {
                let mesh = MeshData {
                    nodes: Vec::with_capacity(size_arg(num_nodes)?),
                    elements: Vec::with_capacity(size_arg(num_elements)?),
                    ..MeshData::default()
                };
                Ok(self.register(EngineObject::Mesh(mesh)))
            }
            MeshCall::NumNodes { obj } => with!(self.obj(obj)?, Mesh, "a mesh", |m| Ok(count(m.nodes.len()))),
            MeshCall::NumElements { obj } => {
                with!(self.obj(obj)?, Mesh, "a mesh", |m| Ok(count(m.elements.len())))
            }
            MeshCall::NumFaces { obj } => with!(self.obj(obj)?, Mesh, "a mesh", |_m| Ok(count(0))),
            MeshCall::Unit { obj } => with!(self.obj(obj)?, Mesh, "a mesh", |m| Ok(Reply::Text(m.unit.clone()))),
            MeshCall::SetUnit { obj, unit } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                m.unit = unit;
                Ok(Reply::Unit)
            }),
            MeshCall::PropertyNames { obj } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                let mut names: Vec<String> = DERIVED_PROPERTIES.iter().map(|s| s.to_string()).collect();
                names.extend(m.properties.keys().cloned());
                names.sort();
                names.dedup();
                Ok(Reply::Strings(names))
            }),
            MeshCall::Property { obj, name } => {
                let mesh = self.obj(obj)?;
                let field = with!(mesh.clone(), Mesh, "a mesh", |m| {
                    if let Some(p) = m.properties.get(&name) {
                        Ok(p.clone())
                    } else {
                        derived_property(m, &name)
                            .map(|mut f| {
                                f.support = Some(mesh.clone());
                                shared(EngineObject::Field(f))
                            })
                            .ok_or_else(|| EngineFailure::not_found(format!("mesh has no property `{name}`")))
                    }
                })?;
                Ok(self.register_shared(field))
            }
            MeshCall::SetProperty { obj, name, field } => {
                let field = self.obj(field)?;
                require_kind(&field, EntityKind::is_field, "a field")?;
                with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                    m.properties.insert(name, field);
                    Ok(Reply::Unit)
                })
            }
            MeshCall::NodesScoping { obj } => {
                let ids = with!(self.obj(obj)?, Mesh, "a mesh", |m| Ok(m.nodes.iter().map(|n| n.id).collect()))?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Nodal.as_str(), ids))))
            }
            MeshCall::ElementsScoping { obj } => {
                let ids = with!(self.obj(obj)?, Mesh, "a mesh", |m| Ok(m.elements.iter().map(|e| e.id).collect()))?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Elemental.as_str(), ids))))
            }
            MeshCall::FacesScoping { obj } => {
                require_kind(&self.obj(obj)?, |k| k == EntityKind::MeshedRegion, "a mesh")?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Faces.as_str(), Vec::new()))))
            }
            MeshCall::NamedSelections { obj } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                Ok(Reply::Strings(m.named_selections.iter().map(|(n, _)| n.clone()).collect()))
            }),
            MeshCall::NamedSelection { obj, name } => {
                let scoping = with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                    m.named_selections
                        .iter()
                        .find(|(n, _)| *n == name)
                        .map(|(_, s)| s.clone())
                        .ok_or_else(|| EngineFailure::not_found(format!("no named selection `{name}`")))
                })?;
                Ok(self.register_shared(scoping))
            }
            MeshCall::SetNamedSelection { obj, name, scoping } => {
                let scoping = self.obj(scoping)?;
                require_kind(&scoping, |k| k == EntityKind::Scoping, "a scoping")?;
                with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                    match m.named_selections.iter_mut().find(|(n, _)| *n == name) {
                        Some(entry) => entry.1 = scoping,
                        None => m.named_selections.push((name, scoping)),
                    }
                    Ok(Reply::Unit)
                })
            }
            MeshCall::AddNodes { obj, nodes } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                let mut seen: HashSet<i32> = m.nodes.iter().map(|n| n.id).collect();
                if let Some(dup) = nodes.iter().find(|n| !seen.insert(n.id)) {
                    return Err(EngineFailure::invalid(format!("duplicate node id {}", dup.id)));
                }
                m.nodes.extend(nodes);
                Ok(Reply::Unit)
            }),
            MeshCall::AddElements { obj, elements } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                let mut seen: HashSet<i32> = m.elements.iter().map(|e| e.id).collect();
                let n_nodes = m.nodes.len();
                for e in &elements {
                    if !seen.insert(e.id) {
                        return Err(EngineFailure::invalid(format!("duplicate element id {}", e.id)));
                    }
                    if let Some(bad) = e.connectivity.iter().find(|&&c| usize::try_from(c).map_or(true, |c| c >= n_nodes)) {
                        return Err(EngineFailure::invalid(format!(
                            "element {} references node index {bad} outside 0..{n_nodes}",
                            e.id
                        )));
                    }
                }
                m.elements.extend(elements.into_iter().map(|mut e| {
                    if e.shape == ElementShape::Unknown {
                        e.shape = ElementShape::guess(e.connectivity.len());
                    }
                    e
                }));
                Ok(Reply::Unit)
            }),
            MeshCall::TopologyFlags { obj } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                Ok(Reply::TopologyFlags(TopologyFlags::from_shapes(m.elements.iter().map(|e| e.shape))))
            }),
            MeshCall::NodeCoordinates { obj, index: i } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                let i = index(i, m.nodes.len(), "node")?;
                Ok(Reply::Value(Value::Primitive(Primitive::Doubles(m.nodes[i].coordinates.to_vec()))))
            }),
            MeshCall::ElementConnectivity { obj, index: i } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                let i = index(i, m.elements.len(), "element")?;
                Ok(Reply::Value(Value::Primitive(Primitive::Ints(m.elements[i].connectivity.clone()))))
            }),
            MeshCall::ElementShape { obj, index: i } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                let i = index(i, m.elements.len(), "element")?;
                Ok(Reply::Int(i64::from(m.elements[i].shape.code())))
            }),
            MeshCall::NodeIndexById { obj, id } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                Ok(Reply::Int(m.nodes.iter().position(|n| n.id == id).map_or(-1, |p| p as i64)))
            }),
            MeshCall::ElementIndexById { obj, id } => with!(self.obj(obj)?, Mesh, "a mesh", |m| {
                Ok(Reply::Int(m.elements.iter().position(|e| e.id == id).map_or(-1, |p| p as i64)))
            }),
        }
    }

    fn frequency_field(&self, obj: ObjectId, complex: bool) -> EngineResult<Shared> {
        with!(self.obj(obj)?, TimeFreq, "a time-frequency support", |t| {
            let field = if complex { &t.imaginary } else { &t.frequencies };
            field.clone().ok_or_else(|| {
                EngineFailure::not_found(if complex { "no imaginary frequencies" } else { "no frequencies" })
            })
        })
    }

    fn double_field(&self, id: ObjectId) -> EngineResult<Shared> {
        let field = self.obj(id)?;
        require_kind(&field, |k| k == EntityKind::Field, "a double field")?;
        Ok(field)
    }

    pub(in crate::transport::loopback) fn time_freq(&self, call: TimeFreqCall) -> EngineResult<Reply> {
        match call {
            TimeFreqCall::New => Ok(self.register(EngineObject::TimeFreq(TimeFreqData::default()))),
            TimeFreqCall::Frequencies { obj, complex } => {
                let field = self.frequency_field(obj, complex)?;
                Ok(self.register_shared(field))
            }
            TimeFreqCall::SetFrequencies { obj, field, complex } => {
                let field = self.double_field(field)?;
                with!(self.obj(obj)?, TimeFreq, "a time-frequency support", |t| {
                    if complex {
                        t.imaginary = Some(field);
                    } else {
                        t.frequencies = Some(field);
                    }
                    Ok(Reply::Unit)
                })
            }
            TimeFreqCall::Rpms { obj } => {
                let field = with!(self.obj(obj)?, TimeFreq, "a time-frequency support", |t| {
                    t.rpms.clone().ok_or_else(|| EngineFailure::not_found("no rpms"))
                })?;
                Ok(self.register_shared(field))
            }
            TimeFreqCall::SetRpms { obj, field } => {
                let field = self.double_field(field)?;
                with!(self.obj(obj)?, TimeFreq, "a time-frequency support", |t| {
                    t.rpms = Some(field);
                    Ok(Reply::Unit)
                })
            }
            TimeFreqCall::HarmonicIndices { obj, stage } => {
                let field = with!(self.obj(obj)?, TimeFreq, "a time-frequency support", |t| {
                    t.harmonic_indices
                        .get(&stage)
                        .cloned()
                        .ok_or_else(|| EngineFailure::not_found(format!("no harmonic indices for stage {stage}")))
                })?;
                Ok(self.register_shared(field))
            }
            TimeFreqCall::SetHarmonicIndices { obj, stage, field } => {
                let field = self.obj(field)?;
                require_kind(&field, EntityKind::is_field, "a field")?;
                with!(self.obj(obj)?, TimeFreq, "a time-frequency support", |t| {
                    t.harmonic_indices.insert(stage, field);
                    Ok(Reply::Unit)
                })
            }
            TimeFreqCall::NSets { obj } => {
                let field = with!(self.obj(obj)?, TimeFreq, "a time-frequency support", |t| Ok(t.frequencies.clone()))?;
                let n = match field {
                    Some(f) => steps(&f)?.iter().map(|(_, v)| v.len()).sum(),
                    None => 0,
                };
                Ok(count(n))
            }
            TimeFreqCall::FrequencyByStep {
                obj,
                step,
                substep,
                complex,
            } => {
                let steps = steps(&self.frequency_field(obj, complex)?)?;
                let (_, values) = steps
                    .iter()
                    .find(|(id, _)| *id == step)
                    .ok_or_else(|| EngineFailure::not_found(format!("no step {step}")))?;
                usize::try_from(substep - 1)
                    .ok()
                    .and_then(|i| values.get(i))
                    .map(|f| Reply::Double(*f))
                    .ok_or_else(|| EngineFailure::not_found(format!("step {step} has no substep {substep}")))
            }
            TimeFreqCall::FrequencyByCumulative { obj, index: i, complex } => {
                let all: Vec<f64> = steps(&self.frequency_field(obj, complex)?)?
                    .into_iter()
                    .flat_map(|(_, v)| v)
                    .collect();
                let i = index(i, all.len(), "cumulative")?;
                Ok(Reply::Double(all[i]))
            }
            TimeFreqCall::CumulativeIndex { obj, step, substep } => {
                let mut offset = 0usize;
                for (id, values) in steps(&self.frequency_field(obj, false)?)? {
                    if id == step {
                        return usize::try_from(substep - 1)
                            .ok()
                            .filter(|&s| s < values.len())
                            .map(|s| count(offset + s))
                            .ok_or_else(|| EngineFailure::not_found(format!("step {step} has no substep {substep}")));
                    }
                    offset += values.len();
                }
                Err(EngineFailure::not_found(format!("no step {step}")))
            }
            TimeFreqCall::StepSubstep { obj, index: i } => {
                let steps = steps(&self.frequency_field(obj, false)?)?;
                let total = steps.iter().map(|(_, v)| v.len()).sum();
                let mut rest = index(i, total, "cumulative")?;
                for (id, values) in steps {
                    if rest < values.len() {
                        return Ok(Reply::Value(Value::Primitive(Primitive::Ints(vec![id, rest as i32 + 1]))));
                    }
                    rest -= values.len();
                }
                Err(EngineFailure::invariant("cumulative index past the last step"))
            }
            TimeFreqCall::CumulativeIndexByFrequency { obj, value, complex } => {
                let tolerance = FREQUENCY_TOLERANCE * value.abs().max(1.0);
                steps(&self.frequency_field(obj, complex)?)?
                    .into_iter()
                    .flat_map(|(_, v)| v)
                    .position(|f| (f - value).abs() <= tolerance)
                    .map(count)
                    .ok_or_else(|| EngineFailure::not_found(format!("no set at frequency {value}")))
            }
        }
    }

    /// Property field pairing the nodes across a sector interface, keyed
    /// by the low node (or the high node when `reversed`).
    fn interface_map(&self, obj: ObjectId, s: i32, reversed: bool) -> EngineResult<Reply> {
        let pairs = with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
            stage(c, s).map(|st| st.low_high.clone())
        })?;
        let (ids, data): (Vec<i32>, Vec<i32>) = if reversed {
            pairs.into_iter().map(|(l, h)| (h, l)).unzip()
        } else {
            pairs.into_iter().unzip()
        };
        Ok(self.register(EngineObject::Field(int_field(Location::Nodal, ids, data))))
    }

    pub(in crate::transport::loopback) fn cyclic(&self, call: CyclicCall) -> EngineResult<Reply> {
        match call {
            CyclicCall::New {
                stages,
                coordinate_system,
            } => {
                if let Some(bad) = stages.iter().find(|s| s.num_sectors <= 0) {
                    return Err(EngineFailure::invalid(format!("a stage needs sectors, got {}", bad.num_sectors)));
                }
                Ok(self.register(EngineObject::Cyclic(CyclicData {
                    stages,
                    coordinate_system,
                })))
            }
            CyclicCall::NumStages { obj } => {
                with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| Ok(count(c.stages.len())))
            }
            CyclicCall::NumSectors { obj, stage: s } => with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
                stage(c, s).map(|st| Reply::Int(i64::from(st.num_sectors)))
            }),
            CyclicCall::BaseNodesScoping { obj, stage: s } => {
                let ids = with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
                    stage(c, s).map(|st| st.base_node_ids.clone())
                })?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Nodal.as_str(), ids))))
            }
            CyclicCall::BaseElementsScoping { obj, stage: s } => {
                let ids = with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
                    stage(c, s).map(|st| st.base_element_ids.clone())
                })?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Elemental.as_str(), ids))))
            }
            CyclicCall::SectorsForExpansion { obj, stage: s } => {
                let ids = with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
                    stage(c, s).map(|st| {
                        st.sectors_for_expansion
                            .clone()
                            .unwrap_or_else(|| (0..st.num_sectors).collect())
                    })
                })?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Sectors.as_str(), ids))))
            }
            CyclicCall::CoordinateSystem { obj } => with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
                Ok(Reply::Value(Value::Primitive(Primitive::Doubles(c.coordinate_system.clone()))))
            }),
            CyclicCall::LowHighMap { obj, stage: s } => self.interface_map(obj, s, false),
            CyclicCall::HighLowMap { obj, stage: s } => self.interface_map(obj, s, true),
            CyclicCall::ExpandNodeId { obj, id, sectors, stage: s } => {
                let ids = with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
                    let st = stage(c, s)?;
                    expand(st, &st.base_node_ids, id, sectors)
                })?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Nodal.as_str(), ids))))
            }
            CyclicCall::ExpandElementId { obj, id, sectors, stage: s } => {
                let ids = with!(self.obj(obj)?, Cyclic, "a cyclic support", |c| {
                    let st = stage(c, s)?;
                    expand(st, &st.base_element_ids, id, sectors)
                })?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(Location::Elemental.as_str(), ids))))
            }
        }
    }

    pub(in crate::transport::loopback) fn generic_support(&self, call: GenericSupportCall) -> EngineResult<Reply> {
        match call {
            GenericSupportCall::New { location } => Ok(self.register(EngineObject::GenericSupport(GenericSupportData {
                location,
                properties: Vec::new(),
            }))),
            GenericSupportCall::Location { obj } => with!(self.obj(obj)?, GenericSupport, "a generic support", |g| {
                Ok(Reply::Text(g.location.clone()))
            }),
            GenericSupportCall::SetProperty { obj, name, field } => {
                let field = self.obj(field)?;
                require_kind(&field, EntityKind::is_field, "a field")?;
                with!(self.obj(obj)?, GenericSupport, "a generic support", |g| {
                    match g.properties.iter_mut().find(|(n, _)| *n == name) {
                        Some(entry) => entry.1 = field,
                        None => g.properties.push((name, field)),
                    }
                    Ok(Reply::Unit)
                })
            }
            GenericSupportCall::Property { obj, name } => {
                let field = with!(self.obj(obj)?, GenericSupport, "a generic support", |g| {
                    g.properties
                        .iter()
                        .find(|(n, _)| *n == name)
                        .map(|(_, f)| f.clone())
                        .ok_or_else(|| EngineFailure::not_found(format!("no property `{name}`")))
                })?;
                Ok(self.register_shared(field))
            }
            GenericSupportCall::PropertyNames { obj } => {
                with!(self.obj(obj)?, GenericSupport, "a generic support", |g| {
                    Ok(Reply::Strings(g.properties.iter().map(|(n, _)| n.clone()).collect()))
                })
            }
        }
    }

    pub(in crate::transport::loopback) fn result_info(&self, call: ResultInfoCall) -> EngineResult<Reply> {
        match call {
            ResultInfoCall::New { info } => Ok(self.register(EngineObject::ResultInfo(info))),
            ResultInfoCall::Describe { obj } => {
                with!(self.obj(obj)?, ResultInfo, "a result info", |r| Ok(Reply::ResultInfo(r.clone())))
            }
            ResultInfoCall::QualifierLabels { obj } => {
                let names: Vec<String> = with!(self.obj(obj)?, ResultInfo, "a result info", |r| {
                    Ok(r.qualifier_labels.keys().cloned().collect())
                })?;
                let mut labels = CollectionData::new(EntryKind::String);
                labels.entries = names
                    .into_iter()
                    .map(|n| (LabelSpace::new(), Primitive::String(n).into()))
                    .collect();
                Ok(self.register(EngineObject::Collection(labels)))
            }
            ResultInfoCall::QualifierLabelSupport { obj, label } => {
                let pairs = with!(self.obj(obj)?, ResultInfo, "a result info", |r| {
                    r.qualifier_labels
                        .get(&label)
                        .cloned()
                        .ok_or_else(|| EngineFailure::not_found(format!("no qualifier label `{label}`")))
                })?;
                let (ids, names): (Vec<i32>, Vec<String>) = pairs.into_iter().unzip();
                let names = FieldData::with_values(
                    FieldValueKind::String,
                    FieldDefinitionData::new(Location::from(label.as_str()), Dimensionality::scalar()),
                    ids,
                    Payload::Strings(names),
                );
                Ok(self.register(EngineObject::GenericSupport(GenericSupportData {
                    location: label,
                    properties: vec![("names".to_string(), shared(EngineObject::Field(names)))],
                })))
            }
        }
    }

    pub(in crate::transport::loopback) fn data_sources(&self, call: DataSourcesCall) -> EngineResult<Reply> {
        match call {
            DataSourcesCall::New { result_path } => {
                let entries = result_path
                    .map(|path| DataSourceEntry {
                        key: default_key(&path),
                        path,
                        domain: None,
                        is_result: true,
                    })
                    .into_iter()
                    .collect();
                Ok(self.register(EngineObject::DataSources(entries)))
            }
            DataSourcesCall::SetResultFilePath { obj, path, key } => {
                with!(self.obj(obj)?, DataSources, "data sources", |d| {
                    d.retain(|e| !e.is_result);
                    d.insert(
                        0,
                        DataSourceEntry {
                            key: key.unwrap_or_else(|| default_key(&path)),
                            path,
                            domain: None,
                            is_result: true,
                        },
                    );
                    Ok(Reply::Unit)
                })
            }
            DataSourcesCall::AddFilePath { obj, path, key, domain } => {
                with!(self.obj(obj)?, DataSources, "data sources", |d| {
                    d.push(DataSourceEntry {
                        key: key.unwrap_or_else(|| default_key(&path)),
                        path,
                        domain,
                        is_result: false,
                    });
                    Ok(Reply::Unit)
                })
            }
            DataSourcesCall::ResultKey { obj } => with!(self.obj(obj)?, DataSources, "data sources", |d| {
                Ok(Reply::Text(
                    d.iter().find(|e| e.is_result).map(|e| e.key.clone()).unwrap_or_default(),
                ))
            }),
            DataSourcesCall::Entries { obj } => {
                with!(self.obj(obj)?, DataSources, "data sources", |d| Ok(Reply::DataSourceEntries(d.clone())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::records::NodeRecord;

    #[test]
    fn element_type_combines_shape_and_node_count() {
        let e = ElementRecord::new(1, ElementShape::Solid, vec![0; 8]);
        assert_eq!(element_type(&e), 108);
    }

    #[test]
    fn connectivity_property_carries_offsets() {
        let mesh = MeshData {
            nodes: (0..4).map(|i| NodeRecord::new(i + 1, [f64::from(i), 0.0, 0.0])).collect(),
            elements: vec![
                ElementRecord::new(10, ElementShape::Beam, vec![0, 1]),
                ElementRecord::new(11, ElementShape::Shell, vec![0, 1, 2, 3]),
            ],
            ..MeshData::default()
        };
        let f = derived_property(&mesh, CONNECTIVITY).unwrap();
        assert_eq!(f.data_pointer, Some(vec![0, 2]));
        assert_eq!(f.entity_range(1, 2).unwrap(), 2..6);
        assert!(derived_property(&mesh, "nope").is_none());
    }

    #[test]
    fn expansion_offsets_by_max_base_id() {
        let st = CyclicStage::new(4, vec![1, 2, 3], vec![1]);
        assert_eq!(expand(&st, &st.base_node_ids, 2, None).unwrap(), vec![2, 5, 8, 11]);
        assert_eq!(expand(&st, &st.base_node_ids, 2, Some(vec![1])).unwrap(), vec![5]);
        assert!(expand(&st, &st.base_node_ids, 9, None).is_err());
        assert!(expand(&st, &st.base_node_ids, 1, Some(vec![4])).is_err());
    }
}
