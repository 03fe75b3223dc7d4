use crate::proto::request::Arguments;
use crate::serializer::{MemberShape, ParamShape};
use crate::service::HandlerError;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// The outcome of invoking one bound member: a produced value, or an error to
/// be converted into a structured response.
pub type OperationResult = Result<Value, HandlerError>;

/// The type-erased entry point of one bound member. The handler object is
/// captured inside at declaration time.
pub type Invoker = Arc<dyn Fn(Arguments) -> BoxFuture<'static, OperationResult> + Send + Sync>;

/// The callable description of one interface: a name plus the operations and
/// properties a handler object exposes under it.
///
/// A contract replaces runtime reflection with an explicit registry: each
/// member carries its declared signature (for argument gathering and
/// introspection) and an [`Invoker`] closing over the handler.
pub struct Contract {
    name: Arc<str>,
    members: Vec<Member>,
}

/// One bound member of a [`Contract`].
pub enum Member {
    /// A named operation with declared parameters.
    Operation(Operation),
    /// A readable property.
    Property(Property),
}

/// A bound operation: its declared signature and its invoker.
pub struct Operation {
    name: Arc<str>,
    params: Vec<Param>,
    returns: Option<Arc<str>>,
    no_reply: bool,
    introspectable: bool,
    invoker: Invoker,
}

/// A bound readable property: its declared type and its getter.
///
/// Property writes are not supported by this runtime, so every property
/// reports `writeable = false`.
pub struct Property {
    name: Arc<str>,
    type_name: Arc<str>,
    introspectable: bool,
    getter: Invoker,
}

/// One declared parameter of an [`Operation`].
#[derive(Debug, Clone)]
pub struct Param {
    name: Arc<str>,
    type_name: Arc<str>,
    optional: bool,
    default: Option<Value>,
}

/// Allows to build a [`Contract`] incrementally.
pub struct ContractBuilder {
    name: Arc<str>,
    members: Vec<Member>,
}

/// Allows to declare an [`Operation`] incrementally; terminated by
/// [`handler`](OperationBuilder::handler), which attaches the invoker.
pub struct OperationBuilder {
    name: Arc<str>,
    params: Vec<Param>,
    returns: Option<Arc<str>>,
    no_reply: bool,
    introspectable: bool,
}

impl Contract {
    /// Creates a new [`ContractBuilder`] for an interface with the given
    /// name.
    pub fn builder(name: impl AsRef<str>) -> ContractBuilder {
        ContractBuilder {
            name: Arc::from(name.as_ref()),
            members: Vec::new(),
        }
    }

    /// Reports the declared interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exposes the declared members.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Looks up a member by name, case-insensitively (ASCII folding).
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members
            .iter()
            .find(|member| member.name().eq_ignore_ascii_case(name))
    }
}

impl ContractBuilder {
    /// Adds an operation to the contract.
    pub fn operation(mut self, operation: Operation) -> Self {
        self.members.push(Member::Operation(operation));

        self
    }

    /// Adds a property to the contract.
    pub fn property(mut self, property: Property) -> Self {
        self.members.push(Member::Property(property));

        self
    }

    /// Finalizes and returns the [`Contract`].
    pub fn build(self) -> Contract {
        Contract {
            name: self.name,
            members: self.members,
        }
    }
}

impl Member {
    /// Reports the declared name of this member.
    pub fn name(&self) -> &str {
        match self {
            Self::Operation(operation) => operation.name(),
            Self::Property(property) => property.name(),
        }
    }

    /// Renders the parsing-relevant shape of this member.
    pub fn shape(&self) -> MemberShape {
        match self {
            Self::Operation(operation) => MemberShape {
                params: operation
                    .params
                    .iter()
                    .map(|param| ParamShape {
                        name: Arc::clone(&param.name),
                        type_name: Arc::clone(&param.type_name),
                        optional: param.optional,
                    })
                    .collect(),
            },
            Self::Property(_) => MemberShape::default(),
        }
    }
}

impl Operation {
    /// Creates a new [`OperationBuilder`] for an operation with the given
    /// name.
    pub fn builder(name: impl AsRef<str>) -> OperationBuilder {
        OperationBuilder {
            name: Arc::from(name.as_ref()),
            params: Vec::new(),
            returns: None,
            no_reply: false,
            introspectable: true,
        }
    }

    /// Reports the declared name of this operation.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Exposes the declared parameters.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Reports the declared return type, or [`None`] for operations that
    /// produce no value.
    pub fn returns(&self) -> Option<&str> {
        self.returns.as_deref()
    }

    /// Reports whether the result of this operation is withheld from the
    /// caller (no reply envelope is published).
    pub fn no_reply(&self) -> bool {
        self.no_reply
    }

    /// Reports whether this operation is enumerated by introspection.
    pub fn introspectable(&self) -> bool {
        self.introspectable
    }

    /// Invokes the bound handler with the given (already gathered)
    /// arguments.
    pub(crate) fn invoke(&self, arguments: Arguments) -> BoxFuture<'static, OperationResult> {
        (self.invoker)(arguments)
    }
}

impl OperationBuilder {
    /// Declares a required parameter.
    pub fn param(mut self, name: impl AsRef<str>, type_name: impl AsRef<str>) -> Self {
        self.params.push(Param {
            name: Arc::from(name.as_ref()),
            type_name: Arc::from(type_name.as_ref()),
            optional: false,
            default: None,
        });

        self
    }

    /// Declares an optional parameter with the default used when a request
    /// omits it.
    pub fn optional_param(
        mut self,
        name: impl AsRef<str>,
        type_name: impl AsRef<str>,
        default: Value,
    ) -> Self {
        self.params.push(Param {
            name: Arc::from(name.as_ref()),
            type_name: Arc::from(type_name.as_ref()),
            optional: true,
            default: Some(default),
        });

        self
    }

    /// Declares the return type. Operations without a declared return type
    /// respond with a null value regardless of what the handler produces.
    pub fn returns(mut self, type_name: impl AsRef<str>) -> Self {
        self.returns = Some(Arc::from(type_name.as_ref()));

        self
    }

    /// Marks the result as withheld from the caller: no reply envelope is
    /// published for this operation.
    pub fn no_reply(mut self) -> Self {
        self.no_reply = true;

        self
    }

    /// Hides this operation from introspection.
    pub fn hidden(mut self) -> Self {
        self.introspectable = false;

        self
    }

    /// Attaches the handler and finalizes the [`Operation`].
    pub fn handler<F, Fut>(self, handler: F) -> Operation
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        Operation {
            name: self.name,
            params: self.params,
            returns: self.returns,
            no_reply: self.no_reply,
            introspectable: self.introspectable,
            invoker: Arc::new(move |arguments| Box::pin(handler(arguments))),
        }
    }
}

impl Property {
    /// Declares a readable property with the given name, declared type, and
    /// getter.
    pub fn new<F, Fut>(name: impl AsRef<str>, type_name: impl AsRef<str>, getter: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OperationResult> + Send + 'static,
    {
        Self {
            name: Arc::from(name.as_ref()),
            type_name: Arc::from(type_name.as_ref()),
            introspectable: true,
            getter: Arc::new(move |arguments| Box::pin(getter(arguments))),
        }
    }

    /// Hides this property from introspection.
    pub fn hidden(mut self) -> Self {
        self.introspectable = false;

        self
    }

    /// Reports the declared name of this property.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the declared type of this property.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Reports whether this property can be read. Always true; a property
    /// without a getter cannot be declared.
    pub fn readable(&self) -> bool {
        true
    }

    /// Reports whether this property can be written. Always false; property
    /// writes are not supported.
    pub fn writeable(&self) -> bool {
        false
    }

    /// Reports whether this property is enumerated by introspection.
    pub fn introspectable(&self) -> bool {
        self.introspectable
    }

    /// Invokes the bound getter.
    pub(crate) fn invoke(&self, arguments: Arguments) -> BoxFuture<'static, OperationResult> {
        (self.getter)(arguments)
    }
}

impl Param {
    /// Reports the declared name of this parameter.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the declared type of this parameter.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Reports whether this parameter may be omitted from a request.
    pub fn optional(&self) -> bool {
        self.optional
    }

    /// Exposes the default value used when a request omits this parameter.
    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}
