use pipecore::{Edge, Flow, FunctionDefinition, GraphError, Language, Node, Transformation};

fn node(id: &str, inputs: &[&str], outputs: &[&str]) -> Node {
    let mut function = FunctionDefinition::new(format!("{}_fn", id));
    for input in inputs {
        function = function.with_input(*input, "any");
    }
    for output in outputs {
        function = function.with_output(*output, "any");
    }
    Node::new(id, id.to_uppercase(), function)
}

fn chain_flow() -> Flow {
    let mut flow = Flow::new("chain");
    flow.add_node(node("a", &[], &["y"]));
    flow.add_node(node("b", &["z"], &["w"]));
    flow.add_node(node("c", &["v"], &[]));
    flow.connect("a", "y", "b", "z");
    flow.connect("b", "w", "c", "v");
    flow
}

fn position(order: &[String], id: &str) -> usize {
    order.iter().position(|n| n == id).unwrap()
}

#[test]
fn test_valid_flow_passes_validation() {
    let flow = chain_flow();
    assert!(flow.validate_connections().is_ok());
}

#[test]
fn test_validation_is_idempotent() {
    let flow = chain_flow();
    let before = flow.clone();

    let first = flow.validate_connections();
    let second = flow.validate_connections();

    assert_eq!(first, second);
    assert_eq!(flow, before, "validation must not mutate the flow");

    let mut broken = chain_flow();
    broken.connect("ghost", "y", "b", "z");
    assert_eq!(broken.validate_connections(), broken.validate_connections());
}

#[test]
fn test_missing_source_node() {
    let mut flow = chain_flow();
    flow.connect("ghost", "y", "b", "z");

    assert_eq!(
        flow.validate_connections(),
        Err(GraphError::SourceNodeNotFound("ghost".to_string()))
    );
}

#[test]
fn test_missing_destination_node() {
    let mut flow = chain_flow();
    flow.connect("a", "y", "nowhere", "z");

    assert_eq!(
        flow.validate_connections(),
        Err(GraphError::DestinationNodeNotFound("nowhere".to_string()))
    );
}

#[test]
fn test_missing_output_and_input_parameters() {
    let mut flow = chain_flow();
    flow.connect("a", "nope", "b", "z");
    assert_eq!(
        flow.validate_connections(),
        Err(GraphError::OutputNotFound {
            node_id: "a".to_string(),
            output: "nope".to_string(),
        })
    );

    let mut flow = chain_flow();
    flow.connect("a", "y", "b", "nope");
    assert_eq!(
        flow.validate_connections(),
        Err(GraphError::InputNotFound {
            node_id: "b".to_string(),
            input: "nope".to_string(),
        })
    );
}

#[test]
fn test_duplicate_node_ids_rejected() {
    let mut flow = chain_flow();
    flow.add_node(node("a", &[], &[]));

    assert_eq!(
        flow.validate_connections(),
        Err(GraphError::DuplicateNode("a".to_string()))
    );
}

#[test]
fn test_execution_order_respects_edges() {
    let mut flow = Flow::new("diamond");
    flow.add_node(node("sink", &["l", "r"], &[]));
    flow.add_node(node("left", &["i"], &["o"]));
    flow.add_node(node("right", &["i"], &["o"]));
    flow.add_node(node("source", &[], &["o"]));
    flow.connect("source", "o", "left", "i");
    flow.connect("source", "o", "right", "i");
    flow.connect("left", "o", "sink", "l");
    flow.connect("right", "o", "sink", "r");

    let order = flow.execution_order().unwrap();

    assert_eq!(order.len(), 4);
    for edge in &flow.edges {
        assert!(
            position(&order, &edge.from_node) < position(&order, &edge.to_node),
            "{} must precede {}",
            edge.from_node,
            edge.to_node
        );
    }
}

#[test]
fn test_execution_order_breaks_ties_by_declaration() {
    let mut flow = Flow::new("independent");
    flow.add_node(node("third", &[], &[]));
    flow.add_node(node("first", &[], &["x"]));
    flow.add_node(node("second", &["x"], &[]));
    flow.connect("first", "x", "second", "x");

    let order = flow.execution_order().unwrap();
    assert_eq!(order, vec!["third", "first", "second"]);

    assert_eq!(flow.execution_order().unwrap(), order);
}

#[test]
fn test_cycle_is_detected_without_partial_order() {
    let mut flow = Flow::new("cycle");
    flow.add_node(node("entry", &[], &["o"]));
    flow.add_node(node("a", &["i", "back"], &["o"]));
    flow.add_node(node("b", &["i"], &["o"]));
    flow.connect("entry", "o", "a", "i");
    flow.connect("a", "o", "b", "i");
    flow.connect("b", "o", "a", "back");

    let result = flow.execution_order();
    assert!(matches!(result, Err(GraphError::CycleDetected)));
    assert!(result.unwrap_err().is_cycle());
}

#[test]
fn test_self_loop_is_a_cycle() {
    let mut flow = Flow::new("self");
    flow.add_node(node("a", &["i"], &["o"]));
    flow.connect("a", "o", "a", "i");

    assert_eq!(flow.execution_order(), Err(GraphError::CycleDetected));
}

#[test]
fn test_required_inputs_and_first_edge_wins() {
    let mut flow = Flow::new("inputs");
    flow.add_node(node("a", &[], &["y", "q"]));
    flow.add_node(node("b", &["z", "extra"], &["w"]));
    flow.add_edge(Edge::new("a", "y", "b", "z"));
    flow.add_edge(
        Edge::new("a", "q", "b", "z")
            .with_transformation(Transformation::custom(Language::Python, "x")),
    );

    assert_eq!(flow.required_inputs(), vec!["b.extra".to_string()]);

    let chosen = flow.edge_into("b", "z").unwrap();
    assert_eq!(chosen.from_output, "y");
    assert!(chosen.transformation.is_identity());
    assert_eq!(flow.terminal_nodes(), vec!["b"]);
}

#[test]
fn test_flow_json_round_trip_shape() {
    let json = r#"{
        "name": "from json",
        "nodes": [
            {"id": "a", "name": "A", "function": {
                "name": "produce",
                "outputs": [{"name": "y", "type": "int"}],
                "implementation": {"kind": "registered", "name": "const", "config": {"value": 7}}
            }},
            {"id": "b", "name": "B", "function": {
                "name": "consume",
                "inputs": [{"name": "z", "type": "int", "description": "incoming"}]
            }}
        ],
        "edges": [
            {"from_node": "a", "from_output": "y", "to_node": "b", "to_input": "z",
             "transformation": {"type": "custom", "language": "javascript", "code": "x => x"}}
        ]
    }"#;

    let flow: Flow = serde_json::from_str(json).unwrap();
    assert!(flow.validate_connections().is_ok());
    assert_eq!(
        flow.edges[0].transformation,
        Transformation::custom(Language::Javascript, "x => x")
    );
    assert_eq!(
        flow.nodes[1].function.implementation,
        pipecore::Implementation::Default
    );
    assert_eq!(
        flow.nodes[0].function.implementation.config().unwrap()["value"],
        pipecore::Value::Number(7.0)
    );
}
