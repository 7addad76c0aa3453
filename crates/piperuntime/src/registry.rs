use pipecore::{
    GraphError, Implementation, Invocable, LocalFunction, Node, NodeContext, NodeError,
    NodeOutput, Parameter, ValueMap,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating invocables from a function reference
pub trait FunctionFactory: Send + Sync {
    /// Create an instance configured by the reference's `config`
    fn create(&self, config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError>;

    /// Name flows use to reference this function
    fn name(&self) -> &str;

    fn metadata(&self) -> FunctionMetadata {
        FunctionMetadata::default()
    }
}

/// Description of a registered function, for listings and editors
#[derive(Debug, Clone, Serialize)]
pub struct FunctionMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<Parameter>,
    pub outputs: Vec<Parameter>,
}

impl Default for FunctionMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

/// Factory handing out one shared, config-independent instance.
struct SharedInstance {
    name: String,
    invocable: Arc<dyn Invocable>,
    metadata: FunctionMetadata,
}

impl FunctionFactory for SharedInstance {
    fn create(&self, _config: &ValueMap) -> Result<Arc<dyn Invocable>, NodeError> {
        Ok(self.invocable.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn metadata(&self) -> FunctionMetadata {
        self.metadata.clone()
    }
}

/// Registry of functions flows can reference, plus the injected default.
pub struct FunctionRegistry {
    factories: HashMap<String, Arc<dyn FunctionFactory>>,
    default: Option<Arc<dyn Invocable>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default: None,
        }
    }

    pub fn register(&mut self, factory: Arc<dyn FunctionFactory>) {
        let name = factory.name().to_string();
        tracing::info!("Registering function: {}", name);
        self.factories.insert(name, factory);
    }

    /// Register an already built invocable under `name`.
    pub fn register_invocable(&mut self, name: impl Into<String>, invocable: Arc<dyn Invocable>) {
        self.register(Arc::new(SharedInstance {
            name: name.into(),
            invocable,
            metadata: FunctionMetadata {
                category: "local".to_string(),
                ..FunctionMetadata::default()
            },
        }));
    }

    /// Register an in-process closure under `name`.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(&NodeContext) -> Result<NodeOutput, NodeError> + Send + Sync + 'static,
    {
        let name = name.into();
        let invocable = Arc::new(LocalFunction::new(name.clone(), func));
        self.register_invocable(name, invocable);
    }

    /// Implementation used by nodes whose function says `{"kind": "default"}`.
    pub fn set_default(&mut self, invocable: Arc<dyn Invocable>) {
        tracing::info!("Default implementation: {}", invocable.kind());
        self.default = Some(invocable);
    }

    pub fn default_implementation(&self) -> Option<&Arc<dyn Invocable>> {
        self.default.as_ref()
    }

    /// Turn a node's implementation reference into something callable.
    pub fn resolve(&self, node: &Node) -> Result<Arc<dyn Invocable>, GraphError> {
        match &node.function.implementation {
            Implementation::Default => self
                .default
                .clone()
                .ok_or_else(|| GraphError::NoDefaultImplementation(node.id.clone())),
            Implementation::Registered { name, config } => {
                let factory =
                    self.factories
                        .get(name)
                        .ok_or_else(|| GraphError::UnknownFunction {
                            node_id: node.id.clone(),
                            function: name.clone(),
                        })?;

                factory
                    .create(config)
                    .map_err(|e| GraphError::InvalidConfiguration {
                        node_id: node.id.clone(),
                        message: e.to_string(),
                    })
            }
        }
    }

    /// Registered function names, sorted
    pub fn list_functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_metadata(&self, name: &str) -> Option<FunctionMetadata> {
        self.factories.get(name).map(|f| f.metadata())
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
