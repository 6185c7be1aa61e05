//! Time/frequency support: the steps, substeps and frequencies of a result.
//!
//! Step ids come from the scoping of the frequencies field; the substeps of a
//! step are the values of its entity data, numbered from 1. The cumulative
//! index runs over every `(step, substep)` pair in that order.

use crate::data::scoping::to_i32;
use crate::data::Field;
use crate::dpf_error::{DpfError, none_if_not_found};
use crate::handle::{DpfObject, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, Primitive, RawObject, TimeFreqCall, Value};

#[derive(Debug)]
pub struct TimeFreqSupport {
    handle: ObjectHandle,
}

dpf_object!(TimeFreqSupport, EntityKind::TimeFreqSupport);

impl TimeFreqSupport {
    pub fn new(server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::TimeFreq(TimeFreqCall::New))?,
        })
    }

    fn call(&self, call: TimeFreqCall) -> Result<crate::transport::call::Reply, DpfError> {
        self.handle.call(Call::TimeFreq(call))
    }

    fn optional_field(&self, call: TimeFreqCall) -> Result<Option<Field>, DpfError> {
        let raw: Result<RawObject, DpfError> = self.call(call).and_then(|r| r.into_object());
        match none_if_not_found(raw)? {
            Some(raw) => Field::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone())).map(Some),
            None => Ok(None),
        }
    }

    /// Real (or imaginary, with `complex`) frequencies, if set.
    pub fn time_frequencies(&self, complex: bool) -> Result<Option<Field>, DpfError> {
        self.optional_field(TimeFreqCall::Frequencies {
            obj: self.handle.id(),
            complex,
        })
    }

    pub fn set_time_frequencies(&self, field: &Field) -> Result<(), DpfError> {
        self.set_frequencies(field, false)
    }

    pub fn set_complex_frequencies(&self, field: &Field) -> Result<(), DpfError> {
        self.set_frequencies(field, true)
    }

    fn set_frequencies(&self, field: &Field, complex: bool) -> Result<(), DpfError> {
        self.handle.ensure_same_server(field.handle())?;
        self.call(TimeFreqCall::SetFrequencies {
            obj: self.handle.id(),
            field: field.object_id(),
            complex,
        })?
        .into_unit()
    }

    pub fn rpms(&self) -> Result<Option<Field>, DpfError> {
        self.optional_field(TimeFreqCall::Rpms { obj: self.handle.id() })
    }

    pub fn set_rpms(&self, field: &Field) -> Result<(), DpfError> {
        self.handle.ensure_same_server(field.handle())?;
        self.call(TimeFreqCall::SetRpms {
            obj: self.handle.id(),
            field: field.object_id(),
        })?
        .into_unit()
    }

    /// Cyclic harmonic indices of `stage`, if set.
    pub fn harmonic_indices(&self, stage: i32) -> Result<Option<Field>, DpfError> {
        self.optional_field(TimeFreqCall::HarmonicIndices {
            obj: self.handle.id(),
            stage,
        })
    }

    pub fn set_harmonic_indices(&self, field: &Field, stage: i32) -> Result<(), DpfError> {
        self.handle.ensure_same_server(field.handle())?;
        self.call(TimeFreqCall::SetHarmonicIndices {
            obj: self.handle.id(),
            stage,
            field: field.object_id(),
        })?
        .into_unit()
    }

    /// Number of `(step, substep)` sets.
    pub fn n_sets(&self) -> Result<usize, DpfError> {
        self.call(TimeFreqCall::NSets { obj: self.handle.id() })?.into_count()
    }

    /// # Errors
    /// `NotFound` for an unknown step or substep.
    pub fn frequency_by_step(&self, step: i32, substep: i32, complex: bool) -> Result<f64, DpfError> {
        self.call(TimeFreqCall::FrequencyByStep {
            obj: self.handle.id(),
            step,
            substep,
            complex,
        })?
        .into_double()
    }

    pub fn frequency_by_cumulative_index(&self, index: usize, complex: bool) -> Result<f64, DpfError> {
        self.call(TimeFreqCall::FrequencyByCumulative {
            obj: self.handle.id(),
            index: to_i32(index)?,
            complex,
        })?
        .into_double()
    }

    /// 0-based cumulative index of `(step, substep)`.
    pub fn cumulative_index(&self, step: i32, substep: i32) -> Result<usize, DpfError> {
        self.call(TimeFreqCall::CumulativeIndex {
            obj: self.handle.id(),
            step,
            substep,
        })?
        .into_count()
    }

    /// `(step, substep)` of a cumulative index.
    pub fn step_substep(&self, index: usize) -> Result<(i32, i32), DpfError> {
        let v = self
            .call(TimeFreqCall::StepSubstep {
                obj: self.handle.id(),
                index: to_i32(index)?,
            })?
            .into_value()?;
        match v {
            Value::Primitive(Primitive::Ints(pair)) if pair.len() == 2 => Ok((pair[0], pair[1])),
            other => Err(DpfError::protocol(format!("expected (step, substep), got {other:?}"))),
        }
    }

    /// # Errors
    /// `NotFound` if no set has frequency `value`.
    pub fn cumulative_index_by_frequency(&self, value: f64, complex: bool) -> Result<usize, DpfError> {
        self.call(TimeFreqCall::CumulativeIndexByFrequency {
            obj: self.handle.id(),
            value,
            complex,
        })?
        .into_count()
    }
}
