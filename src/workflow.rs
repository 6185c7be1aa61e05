//! Workflows: operator graphs exposed through named input and output pins.
//!
//! Pin names are unique per side; exposing a name again rebinds it.
//! [`Workflow::connect_with`] chains two workflows: `self` absorbs `left`,
//! every output of `left` whose name (or mapped name) matches an input of
//! `self` becomes a real connection, the consumed inputs disappear, and the
//! remaining inputs and outputs of `left` are added to `self`.

use crate::codec::Payload;
use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, FromOutput, ObjectHandle, dpf_object};
use crate::operator::{Input, Operator};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, Reply, WorkflowCall};
use crate::transport::TransferOptions;
use log::debug;

#[derive(Debug)]
pub struct Workflow {
    handle: ObjectHandle,
}

dpf_object!(Workflow, EntityKind::Workflow);

impl Workflow {
    pub fn new(server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::Workflow(WorkflowCall::New))?,
        })
    }

    fn call(&self, call: WorkflowCall) -> Result<Reply, DpfError> {
        self.handle.call(Call::Workflow(call))
    }

    pub fn add_operator(&self, op: &Operator) -> Result<(), DpfError> {
        self.handle.ensure_same_server(op.handle())?;
        self.call(WorkflowCall::AddOperator {
            obj: self.handle.id(),
            op: op.object_id(),
        })?
        .into_unit()
    }

    pub fn add_operators(&self, ops: &[&Operator]) -> Result<(), DpfError> {
        ops.iter().try_for_each(|op| self.add_operator(op))
    }

    /// Catalog names of the member operators, in insertion order.
    pub fn operator_names(&self) -> Result<Vec<String>, DpfError> {
        self.call(WorkflowCall::OperatorNames { obj: self.handle.id() })?
            .into_strings()
    }

    /// Expose input `pin` of `op` as `name`.
    pub fn set_input_name(&self, name: &str, op: &Operator, pin: i32) -> Result<(), DpfError> {
        self.handle.ensure_same_server(op.handle())?;
        self.call(WorkflowCall::SetInputName {
            obj: self.handle.id(),
            name: name.to_string(),
            op: op.object_id(),
            pin,
        })?
        .into_unit()
    }

    /// Expose output `pin` of `op` as `name`.
    pub fn set_output_name(&self, name: &str, op: &Operator, pin: i32) -> Result<(), DpfError> {
        self.handle.ensure_same_server(op.handle())?;
        self.call(WorkflowCall::SetOutputName {
            obj: self.handle.id(),
            name: name.to_string(),
            op: op.object_id(),
            pin,
        })?
        .into_unit()
    }

    pub fn input_names(&self) -> Result<Vec<String>, DpfError> {
        self.call(WorkflowCall::InputNames { obj: self.handle.id() })?
            .into_strings()
    }

    pub fn output_names(&self) -> Result<Vec<String>, DpfError> {
        self.call(WorkflowCall::OutputNames { obj: self.handle.id() })?
            .into_strings()
    }

    /// Feed exposed input `name`.
    ///
    /// # Errors
    /// `NotFound` if no input is exposed under `name`.
    pub fn connect<'a>(&self, name: &str, value: impl Into<Input<'a>>) -> Result<(), DpfError> {
        let value = value.into();
        let server = self.handle.server();
        match value.to_pin_value(server)? {
            Some(value) => self
                .call(WorkflowCall::Connect {
                    obj: self.handle.id(),
                    name: name.to_string(),
                    value,
                })?
                .into_unit(),
            None => server
                .upload(
                    Call::Workflow(WorkflowCall::ConnectLargeString {
                        obj: self.handle.id(),
                        name: name.to_string(),
                    }),
                    &Payload::Strings(vec![value.large_string().unwrap_or_default().to_string()]),
                    &mut TransferOptions::new(),
                )?
                .into_unit(),
        }
    }

    /// Evaluate and read exposed output `name`.
    pub fn get_output<T: FromOutput>(&self, name: &str) -> Result<T, DpfError> {
        let v = self
            .call(WorkflowCall::GetOutput {
                obj: self.handle.id(),
                name: name.to_string(),
                kind: T::output_kind(),
            })?
            .into_value()?;
        T::from_value(v, self.handle.server())
    }

    /// Absorb `left`, connecting its outputs to same-named inputs of `self`.
    pub fn connect_with(&self, left: &Workflow) -> Result<(), DpfError> {
        self.connect_with_map(left, None)
    }

    /// Like [`connect_with`](Self::connect_with) with explicit
    /// `(left output, self input)` pairs.
    pub fn connect_with_map(&self, left: &Workflow, map: Option<&[(&str, &str)]>) -> Result<(), DpfError> {
        self.handle.ensure_same_server(left.handle())?;
        self.call(WorkflowCall::ConnectWith {
            obj: self.handle.id(),
            other: left.object_id(),
            map: map.map(|m| m.iter().map(|(o, i)| (o.to_string(), i.to_string())).collect()),
        })?
        .into_unit()
    }

    /// Transportable text form of the workflow.
    pub fn to_text(&self) -> Result<String, DpfError> {
        let bytes = self
            .handle
            .server()
            .download(Call::Workflow(WorkflowCall::ToText { obj: self.handle.id() }), &mut TransferOptions::new())?
            .into_bytes()?;
        String::from_utf8(bytes).map_err(|e| DpfError::protocol(format!("workflow text is not UTF-8: {e}")))
    }

    /// Rebuild a workflow from [`to_text`](Self::to_text) output.
    pub fn from_text(text: &str, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        debug!("rebuild workflow from {} bytes of text", text.len());
        let raw = server
            .upload(
                Call::Workflow(WorkflowCall::FromText),
                &Payload::Bytes(text.as_bytes().to_vec()),
                &mut TransferOptions::new(),
            )?
            .into_object()?;
        Self::from_handle(ObjectHandle::from_raw(raw, server))
    }

    /// Register in the engine-wide registry and return the record id.
    ///
    /// With `transfer_ownership` the registry keeps the workflow alive after
    /// every client handle is gone; otherwise the record only resolves
    /// while some handle still exists.
    pub fn record(&self, identifier: Option<&str>, transfer_ownership: bool) -> Result<i64, DpfError> {
        self.call(WorkflowCall::Record {
            obj: self.handle.id(),
            identifier: identifier.map(str::to_string),
            transfer_ownership,
        })?
        .into_int()
    }

    /// # Errors
    /// `NotFound` for an unknown or expired record id.
    pub fn get_recorded(id: i64, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        let raw = server.call(Call::Workflow(WorkflowCall::GetRecorded { id }))?.into_object()?;
        Self::from_handle(ObjectHandle::from_raw(raw, server))
    }

    /// Latest live workflow recorded under `identifier`.
    pub fn get_recorded_by_identifier(identifier: &str, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        let raw = server
            .call(Call::Workflow(WorkflowCall::GetRecordedByIdentifier {
                identifier: identifier.to_string(),
            }))?
            .into_object()?;
        Self::from_handle(ObjectHandle::from_raw(raw, server))
    }

    /// Materialise a copy on the engine behind `target`.
    pub fn remote_copy(&self, target: &Server) -> Result<Workflow, DpfError> {
        let address = target.address();
        debug!("copy workflow {} to {address}", self.handle.id());
        let raw = self.call(WorkflowCall::RemoteCopy {
            obj: self.handle.id(),
            address,
        })?
        .into_object()?;
        Self::from_handle(ObjectHandle::from_raw(raw, target.clone()))
    }
}
