use crate::{GraphError, Transformation, Value, ValueMap};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use uuid::Uuid;

pub type FlowId = Uuid;

/// Key under which a node's named slot lives in state or user inputs.
pub fn slot_key(node_id: &str, name: &str) -> String {
    format!("{}.{}", node_id, name)
}

/// One named input or output slot of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Reference from a function definition to the code that runs it.
///
/// Resolved against a function registry when the flow is compiled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Implementation {
    /// The registry's injected default implementation
    #[default]
    Default,
    /// A named function registered with the runtime
    Registered {
        name: String,
        #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
        config: ValueMap,
    },
}

impl Implementation {
    pub fn registered(name: impl Into<String>) -> Self {
        Implementation::Registered {
            name: name.into(),
            config: ValueMap::new(),
        }
    }

    pub fn config(&self) -> Option<&ValueMap> {
        match self {
            Implementation::Registered { config, .. } => Some(config),
            Implementation::Default => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: Vec<Parameter>,
    #[serde(default)]
    pub outputs: Vec<Parameter>,
    #[serde(default)]
    pub implementation: Implementation,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            implementation: Implementation::Default,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, param_type: impl Into<String>) -> Self {
        self.inputs.push(Parameter::new(name, param_type));
        self
    }

    pub fn with_output(mut self, name: impl Into<String>, param_type: impl Into<String>) -> Self {
        self.outputs.push(Parameter::new(name, param_type));
        self
    }

    pub fn implemented_by(mut self, function: impl Into<String>) -> Self {
        self.implementation = Implementation::registered(function);
        self
    }

    /// Attach config to a registered implementation. No-op for the default one.
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let Implementation::Registered { config, .. } = &mut self.implementation {
            config.insert(key.into(), value.into());
        }
        self
    }

    /// No declared inputs and no declared outputs.
    pub fn is_side_effect(&self) -> bool {
        self.inputs.is_empty() && self.outputs.is_empty()
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|p| p.name == name)
    }

    pub fn has_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|p| p.name == name)
    }
}

impl Default for FunctionDefinition {
    fn default() -> Self {
        FunctionDefinition::new("default")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub function: FunctionDefinition,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>, function: FunctionDefinition) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            function,
        }
    }

    pub fn inputs(&self) -> &[Parameter] {
        &self.function.inputs
    }

    pub fn outputs(&self) -> &[Parameter] {
        &self.function.outputs
    }
}

/// Data link from one node's output to another node's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from_node: String,
    pub from_output: String,
    pub to_node: String,
    pub to_input: String,
    #[serde(default)]
    pub transformation: Transformation,
}

impl Edge {
    pub fn new(
        from_node: impl Into<String>,
        from_output: impl Into<String>,
        to_node: impl Into<String>,
        to_input: impl Into<String>,
    ) -> Self {
        Self {
            from_node: from_node.into(),
            from_output: from_output.into(),
            to_node: to_node.into(),
            to_input: to_input.into(),
            transformation: Transformation::Default,
        }
    }

    pub fn with_transformation(mut self, transformation: Transformation) -> Self {
        self.transformation = transformation;
        self
    }

    /// State key the edge reads from.
    pub fn source_key(&self) -> String {
        slot_key(&self.from_node, &self.from_output)
    }

    pub fn targets(&self, node_id: &str, input: &str) -> bool {
        self.to_node == node_id && self.to_input == input
    }
}

/// Node + edge graph. Built once, immutable while pipelines run against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default = "Uuid::new_v4")]
    pub id: FlowId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn add_node(&mut self, node: Node) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    pub fn connect(
        &mut self,
        from_node: impl Into<String>,
        from_output: impl Into<String>,
        to_node: impl Into<String>,
        to_input: impl Into<String>,
    ) {
        self.edges
            .push(Edge::new(from_node, from_output, to_node, to_input));
    }

    pub fn find_node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The edge feeding `(node_id, input)`.
    ///
    /// When several edges target the same input the first one declared wins.
    pub fn edge_into(&self, node_id: &str, input: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.targets(node_id, input))
    }

    /// Every `node.param` input that no edge supplies, in declaration order.
    pub fn required_inputs(&self) -> Vec<String> {
        self.nodes
            .iter()
            .flat_map(|node| {
                node.inputs()
                    .iter()
                    .filter(|param| self.edge_into(&node.id, &param.name).is_none())
                    .map(move |param| slot_key(&node.id, &param.name))
            })
            .collect()
    }

    /// Ids that are never the source of an edge.
    pub fn terminal_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !self.edges.iter().any(|e| e.from_node == n.id))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Map node id -> arena index, rejecting duplicate ids.
    pub fn node_indices(&self) -> Result<HashMap<&str, usize>, GraphError> {
        let mut index = HashMap::with_capacity(self.nodes.len());
        for (i, node) in self.nodes.iter().enumerate() {
            if index.insert(node.id.as_str(), i).is_some() {
                return Err(GraphError::DuplicateNode(node.id.clone()));
            }
        }
        Ok(index)
    }

    /// Check every edge against the nodes it names. Does not mutate the flow.
    pub fn validate_connections(&self) -> Result<(), GraphError> {
        let index = self.node_indices()?;

        for edge in &self.edges {
            let source = index
                .get(edge.from_node.as_str())
                .map(|&i| &self.nodes[i])
                .ok_or_else(|| GraphError::SourceNodeNotFound(edge.from_node.clone()))?;
            let destination = index
                .get(edge.to_node.as_str())
                .map(|&i| &self.nodes[i])
                .ok_or_else(|| GraphError::DestinationNodeNotFound(edge.to_node.clone()))?;

            if !source.function.has_output(&edge.from_output) {
                return Err(GraphError::OutputNotFound {
                    node_id: source.id.clone(),
                    output: edge.from_output.clone(),
                });
            }
            if !destination.function.has_input(&edge.to_input) {
                return Err(GraphError::InputNotFound {
                    node_id: destination.id.clone(),
                    input: edge.to_input.clone(),
                });
            }
        }

        Ok(())
    }

    /// Topological order of node ids.
    pub fn execution_order(&self) -> Result<Vec<String>, GraphError> {
        Ok(self
            .execution_indices()?
            .into_iter()
            .map(|i| self.nodes[i].id.clone())
            .collect())
    }

    /// Kahn's algorithm over arena indices. Among ready nodes the one declared
    /// first is emitted first, so equal flows always yield equal orders.
    pub fn execution_indices(&self) -> Result<Vec<usize>, GraphError> {
        let index = self.node_indices()?;
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut in_degree = vec![0usize; self.nodes.len()];

        for edge in &self.edges {
            let from = *index
                .get(edge.from_node.as_str())
                .ok_or_else(|| GraphError::SourceNodeNotFound(edge.from_node.clone()))?;
            let to = *index
                .get(edge.to_node.as_str())
                .ok_or_else(|| GraphError::DestinationNodeNotFound(edge.to_node.clone()))?;
            adjacency[from].push(to);
            in_degree[to] += 1;
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(Reverse(current)) = ready.pop() {
            order.push(current);
            for &next in &adjacency[current] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() < self.nodes.len() {
            return Err(GraphError::CycleDetected);
        }

        Ok(order)
    }
}
