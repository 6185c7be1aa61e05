//! Operators: named engine computations with pin-indexed inputs and outputs.
//!
//! Inputs are connected with [`Operator::connect`]; connecting a pin again
//! replaces its value. Outputs are produced lazily: the engine evaluates the
//! upstream graph when an output is requested or [`Operator::run`] is called.
//! A failing evaluation reports the engine message together with the name
//! of the operator that failed.

pub mod config;
pub mod specification;

pub use config::{ConfigOption, OperatorConfig};
pub use specification::{ConfigSpec, OperatorSpecification, PinSpec, SpecificationData};

use crate::codec::Payload;
use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, FromOutput, ObjectHandle, dpf_object, ensure_on};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, OperatorCall, PinValue, Primitive, Reply};
use crate::transport::TransferOptions;
use log::debug;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperatorStatus {
    #[default]
    NotRun,
    Running,
    Succeeded,
    Failed,
}

/// Output pin of an operator, usable as an input elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct OutputRef<'a> {
    op: &'a Operator,
    pin: i32,
}

impl OutputRef<'_> {
    pub fn operator(&self) -> &Operator {
        self.op
    }

    pub fn pin(&self) -> i32 {
        self.pin
    }
}

/// Value fed into an input pin.
#[derive(Debug)]
pub enum Input<'a> {
    Primitive(Primitive),
    Object(&'a ObjectHandle),
    Output(OutputRef<'a>),
}

impl<'a> Input<'a> {
    /// Wire value, checked against the target backend.
    ///
    /// Strings above the streaming buffer size return `None` and travel as
    /// an upload instead.
    pub(crate) fn to_pin_value(&self, server: &Server) -> Result<Option<PinValue>, DpfError> {
        match self {
            Input::Primitive(Primitive::String(s)) if s.len() > server.config().streaming_buffer_size => Ok(None),
            Input::Primitive(p) => Ok(Some(PinValue::Primitive(p.clone()))),
            Input::Object(h) => {
                ensure_on(server, h)?;
                Ok(Some(PinValue::Object(h.id())))
            }
            Input::Output(o) => {
                ensure_on(server, &o.op.handle)?;
                Ok(Some(PinValue::Output {
                    op: o.op.handle.id(),
                    pin: o.pin,
                }))
            }
        }
    }

    pub(crate) fn large_string(&self) -> Option<&str> {
        match self {
            Input::Primitive(Primitive::String(s)) => Some(s),
            _ => None,
        }
    }
}

impl<'a, T: DpfObject> From<&'a T> for Input<'a> {
    fn from(obj: &'a T) -> Self {
        Input::Object(obj.handle())
    }
}

impl<'a> From<OutputRef<'a>> for Input<'a> {
    fn from(o: OutputRef<'a>) -> Self {
        Input::Output(o)
    }
}

impl From<Primitive> for Input<'_> {
    fn from(p: Primitive) -> Self {
        Input::Primitive(p)
    }
}

macro_rules! primitive_input {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Input<'_> {
            fn from(v: $ty) -> Self {
                Input::Primitive(v.into())
            }
        })*
    };
}

primitive_input!(i32, f64, bool, String, &str, Vec<i32>, Vec<f64>, &[i32], &[f64]);

#[derive(Debug)]
pub struct Operator {
    handle: ObjectHandle,
}

dpf_object!(Operator, EntityKind::Operator);

impl Operator {
    /// Instantiate catalog operator `name`.
    ///
    /// # Errors
    /// `NotFound` if the engine does not know `name`.
    pub fn new(name: &str, server: Option<&Server>) -> Result<Self, DpfError> {
        Self::create(name, None, server)
    }

    pub fn with_config(name: &str, config: &OperatorConfig, server: Option<&Server>) -> Result<Self, DpfError> {
        Self::create(name, Some(config), server)
    }

    fn create(name: &str, config: Option<&OperatorConfig>, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        if let Some(c) = config {
            ensure_on(&server, c.handle())?;
        }
        debug!("instantiate operator `{name}`");
        Ok(Self {
            handle: ObjectHandle::create(
                &server,
                Call::Operator(OperatorCall::New {
                    name: name.to_string(),
                    config: config.map(|c| c.object_id()),
                }),
            )?,
        })
    }

    fn call(&self, call: OperatorCall) -> Result<Reply, DpfError> {
        self.handle.call(Call::Operator(call))
    }

    pub fn name(&self) -> Result<String, DpfError> {
        self.call(OperatorCall::Name { obj: self.handle.id() })?.into_text()
    }

    /// Bind `value` to input `pin`, replacing any previous binding.
    pub fn connect<'a>(&self, pin: i32, value: impl Into<Input<'a>>) -> Result<(), DpfError> {
        let value = value.into();
        let server = self.handle.server();
        match value.to_pin_value(server)? {
            Some(value) => self
                .call(OperatorCall::Connect {
                    obj: self.handle.id(),
                    pin,
                    value,
                })?
                .into_unit(),
            None => {
                let s = value.large_string().unwrap_or_default();
                debug!("connect {}-byte string to pin {pin} as a stream", s.len());
                server
                    .upload(
                        Call::Operator(OperatorCall::ConnectLargeString {
                            obj: self.handle.id(),
                            pin,
                        }),
                        &Payload::Strings(vec![s.to_string()]),
                        &mut TransferOptions::new(),
                    )?
                    .into_unit()
            }
        }
    }

    pub fn disconnect(&self, pin: i32) -> Result<(), DpfError> {
        self.call(OperatorCall::Disconnect {
            obj: self.handle.id(),
            pin,
        })?
        .into_unit()
    }

    /// Output `pin`, usable as an input of another operator.
    pub fn output(&self, pin: i32) -> OutputRef<'_> {
        OutputRef { op: self, pin }
    }

    /// Evaluate the operator and its upstream graph.
    pub fn run(&self) -> Result<(), DpfError> {
        self.call(OperatorCall::Run { obj: self.handle.id() })?.into_unit()
    }

    pub fn status(&self) -> Result<OperatorStatus, DpfError> {
        self.call(OperatorCall::Status { obj: self.handle.id() })?.into_status()
    }

    /// Evaluate if needed and read output `pin` as a `T`.
    ///
    /// # Errors
    /// `TypeMismatch` if the produced value is not a `T`; the engine error
    /// of the failing operator if evaluation fails.
    pub fn get_output<T: FromOutput>(&self, pin: i32) -> Result<T, DpfError> {
        let v = self
            .call(OperatorCall::GetOutput {
                obj: self.handle.id(),
                pin,
                kind: T::output_kind(),
            })?
            .into_value()?;
        T::from_value(v, self.handle.server())
    }

    pub fn has_output_when_evaluated(&self, pin: i32) -> Result<bool, DpfError> {
        self.call(OperatorCall::HasOutputWhenEvaluated {
            obj: self.handle.id(),
            pin,
        })?
        .into_bool()
    }

    pub fn config(&self) -> Result<OperatorConfig, DpfError> {
        let raw = self.call(OperatorCall::Config { obj: self.handle.id() })?.into_object()?;
        OperatorConfig::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }

    pub fn set_config(&self, config: &OperatorConfig) -> Result<(), DpfError> {
        self.handle.ensure_same_server(config.handle())?;
        self.call(OperatorCall::SetConfig {
            obj: self.handle.id(),
            config: config.object_id(),
        })?
        .into_unit()
    }

    pub fn specification(&self) -> Result<OperatorSpecification, DpfError> {
        OperatorSpecification::new(&self.name()?, Some(self.handle.server()))
    }

    /// Attached derivative operator, if any.
    pub fn derivative(&self) -> Result<Option<Operator>, DpfError> {
        let raw = self
            .call(OperatorCall::Derivative { obj: self.handle.id() })
            .and_then(Reply::into_object);
        match crate::dpf_error::none_if_not_found(raw)? {
            Some(raw) => Operator::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone())).map(Some),
            None => Ok(None),
        }
    }

    /// Attach a derivative operator. It receives the same inputs as `self`
    /// when it has none of its own.
    pub fn set_derivative(&self, derivative: &Operator) -> Result<(), DpfError> {
        self.handle.ensure_same_server(derivative.handle())?;
        self.call(OperatorCall::SetDerivative {
            obj: self.handle.id(),
            derivative: derivative.object_id(),
        })?
        .into_unit()
    }
}
