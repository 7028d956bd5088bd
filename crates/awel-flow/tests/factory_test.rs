use std::sync::Arc;

use awel_config::{FlowData, FlowEdgeData, FlowNodeData, FlowPanel, FlowState, FlowVariables, Parameter, ResourceMetadata};
use awel_dag::WorkflowRunner;
use awel_flow::{FlowError, FlowFactory, FlowManager, FlowsVariablesProvider, BUILTIN_VARIABLES_CORE_FLOWS};
use awel_registry::builtin::{CONSTANT_INPUT, FIELD_EXTRACT, PROMPT, PROMPT_TEMPLATE, TEMPLATE, TEMPLATE_VARIABLES, TO_STRING};
use awel_registry::{Registry, RegistryError, ResourceRegistration};
use awel_variables::{BuiltinVariablesProvider, VariablesFilter};
use serde_json::{Value, json};

fn registry() -> Arc<Registry> {
  Arc::new(Registry::with_builtins())
}

fn operator(registry: &Registry, id: &str, type_cls: &str, values: &[(&str, Value)]) -> FlowNodeData {
  let mut meta = registry.operator(type_cls).unwrap().metadata().clone();
  for (name, value) in values {
    meta.get_parameter_mut(name).unwrap().value = Some(value.clone());
  }
  FlowNodeData::operator(id, meta)
}

fn resource(registry: &Registry, id: &str, type_cls: &str, values: &[(&str, Value)]) -> FlowNodeData {
  let mut meta = registry.resource(type_cls).unwrap().metadata().clone();
  for (name, value) in values {
    let param = meta.parameters.iter_mut().find(|p| p.name == *name).unwrap();
    param.value = Some(value.clone());
  }
  FlowNodeData::resource(id, meta)
}

fn panel(nodes: Vec<FlowNodeData>, edges: Vec<FlowEdgeData>) -> FlowPanel {
  FlowPanel::new(
    "f1",
    "demo",
    FlowData {
      nodes,
      edges,
      ..Default::default()
    },
  )
}

#[tokio::test]
async fn test_resources_are_wired_into_operators() {
  let registry = registry();
  let flow = panel(
    vec![
      operator(&registry, "input", CONSTANT_INPUT, &[("value", json!({"name": "Ada"}))]),
      resource(
        &registry,
        "tpl",
        PROMPT_TEMPLATE,
        &[
          ("template", json!("{{ greeting }}, {{ name }}!")),
          ("input_variables", json!(["name"])),
        ],
      ),
      resource(&registry, "vars", TEMPLATE_VARIABLES, &[("variables", json!({"greeting": "Hello"}))]),
      operator(&registry, "prompt", PROMPT, &[]),
    ],
    vec![
      FlowEdgeData::new("input", "prompt", 0, 0),
      FlowEdgeData::new("tpl", "prompt", 0, 0),
      FlowEdgeData::new("vars", "prompt", 0, 1),
    ],
  );

  let dag = Arc::new(FlowFactory::new(registry).build(&flow).unwrap());
  assert_eq!(dag.dag_id(), "flow_dag_demo_f1");
  // Resources do not become DAG nodes.
  assert_eq!(dag.len(), 2);

  let output = WorkflowRunner::new().call(&dag, "prompt", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!("Hello, Ada!")));
}

#[tokio::test]
async fn test_edge_mappers_become_nodes() {
  let registry = registry();
  let mut flow = panel(
    vec![
      operator(&registry, "input", CONSTANT_INPUT, &[("value", json!({"user": {"age": 36}}))]),
      operator(&registry, "render", TEMPLATE, &[("template", json!("age: {{ input }}"))]),
    ],
    vec![
      FlowEdgeData::new("input", "render", 0, 0).with_mappers(vec![FIELD_EXTRACT.to_string(), TO_STRING.to_string()]),
    ],
  );

  // A mapper without its required parameter cannot be built.
  let err = FlowFactory::new(Arc::clone(&registry)).build(&flow).unwrap_err();
  assert!(matches!(err, FlowError::ClassMetadata { ref node_id, .. } if node_id == "input_render_0_mapper_0"));

  flow.flow_data.edges[0].mappers = vec![TO_STRING.to_string()];
  let dag = Arc::new(FlowFactory::new(registry).build(&flow).unwrap());
  assert_eq!(dag.len(), 3);
  assert!(dag.node("input_render_0_mapper_0").is_some());

  let output = WorkflowRunner::new().call(&dag, "render", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!("age: {\"user\":{\"age\":36}}")));
}

#[test]
fn test_operator_cycle_is_rejected() {
  let registry = registry();
  let flow = panel(
    vec![
      operator(&registry, "a", TEMPLATE, &[("template", json!("{{ input }}"))]),
      operator(&registry, "b", TEMPLATE, &[("template", json!("{{ input }}"))]),
    ],
    vec![FlowEdgeData::new("a", "b", 0, 0), FlowEdgeData::new("b", "a", 0, 0)],
  );
  let err = FlowFactory::new(registry).build(&flow).unwrap_err();
  assert!(matches!(err, FlowError::DagMetadata { .. }));
  assert!(err.is_validation());
}

#[test]
fn test_unknown_type_is_class_error() {
  let registry = registry();
  let mut node = operator(&registry, "x", TO_STRING, &[]);
  if let awel_config::FlowNodeMetadata::Operator(meta) = &mut node.data {
    meta.type_cls = "awel::operators::Missing".to_string();
  }
  let err = FlowFactory::new(registry).build(&panel(vec![node], vec![])).unwrap_err();
  assert!(matches!(
    err,
    FlowError::ClassMetadata { ref node_id, source: RegistryError::UnknownType { .. }, .. } if node_id == "x"
  ));
}

#[test]
fn test_operator_cannot_feed_resource() {
  let registry = registry();
  let flow = panel(
    vec![
      operator(&registry, "input", CONSTANT_INPUT, &[("value", json!(1))]),
      resource(&registry, "vars", TEMPLATE_VARIABLES, &[]),
    ],
    vec![FlowEdgeData::new("input", "vars", 0, 0)],
  );
  let err = FlowFactory::new(registry).build(&flow).unwrap_err();
  assert!(matches!(err, FlowError::Metadata { .. }));
}

#[test]
fn test_resource_type_must_match_slot() {
  let registry = registry();
  let flow = panel(
    vec![
      resource(&registry, "vars", TEMPLATE_VARIABLES, &[]),
      operator(&registry, "prompt", PROMPT, &[]),
    ],
    // Slot 0 expects a prompt template.
    vec![FlowEdgeData::new("vars", "prompt", 0, 0)],
  );
  let err = FlowFactory::new(registry).build(&flow).unwrap_err();
  assert!(matches!(err, FlowError::Metadata { ref message } if message.contains("cannot fill")));
}

#[tokio::test]
async fn test_flow_private_variables_resolve() {
  let registry = registry();
  let mut flow = panel(
    vec![
      operator(&registry, "input", CONSTANT_INPUT, &[("value", json!({"name": "Ada"}))]),
      operator(
        &registry,
        "render",
        TEMPLATE,
        &[("template", json!("${greeting:text@flow_priv:flow_dag_demo_f1}"))],
      ),
    ],
    vec![FlowEdgeData::new("input", "render", 0, 0)],
  );
  flow.variables = vec![FlowVariables::new("greeting", "text", json!("Hi {{ name }}")).with_scope("flow_priv", None)];

  let dag = Arc::new(FlowFactory::new(registry).build(&flow).unwrap());
  let output = WorkflowRunner::new().call(&dag, "render", None).await.unwrap();
  assert_eq!(output.value(), Some(&json!("Hi Ada")));
}

#[tokio::test]
async fn test_manager_tracks_state_and_failures() {
  let registry = registry();
  let manager = Arc::new(FlowManager::new(Arc::clone(&registry)));

  let good = panel(
    vec![operator(&registry, "input", CONSTANT_INPUT, &[("value", json!(1))])],
    vec![],
  );
  manager.register(good).unwrap();
  assert_eq!(manager.get("f1").unwrap().state, FlowState::Developing);
  assert!(manager.dag_by_id("flow_dag_demo_f1").is_some());

  let mut broken = panel(vec![operator(&registry, "input", CONSTANT_INPUT, &[])], vec![]);
  broken.uid = "f2".to_string();
  broken.name = "broken".to_string();
  assert!(manager.register(broken).is_err());
  let stored = manager.get("f2").unwrap();
  assert_eq!(stored.state, FlowState::LoadFailed);
  assert!(stored.error_message.is_some());
  assert!(manager.dag("f2").is_none());

  manager.change_state("f1", FlowState::Deployed).unwrap();
  let err = manager.change_state("f1", FlowState::Initializing).unwrap_err();
  assert!(matches!(err, FlowError::State(_)));
  assert!(matches!(manager.change_state("nope", FlowState::Running), Err(FlowError::NotFound { .. })));

  let provider = FlowsVariablesProvider::new(Arc::clone(&manager));
  let vars = provider
    .get_variables(BUILTIN_VARIABLES_CORE_FLOWS, &VariablesFilter::default())
    .await
    .unwrap();
  let uids: Vec<&Value> = vars.iter().map(|v| &v.value).collect();
  assert_eq!(uids, vec![&json!("f2"), &json!("f1")]);

  assert!(manager.remove("f2").is_some());
  assert_eq!(manager.list().len(), 1);
}

#[test]
fn test_parallel_mapped_edges_get_distinct_nodes() {
  let registry = registry();
  let mut second = FlowEdgeData::new("input", "join", 0, 1).with_mappers(vec![TO_STRING.to_string()]);
  second.id = Some("e2".to_string());
  let flow = panel(
    vec![
      operator(&registry, "input", CONSTANT_INPUT, &[("value", json!(7))]),
      operator(&registry, "join", TEMPLATE, &[("template", json!("{{ input }}"))]),
    ],
    vec![
      FlowEdgeData::new("input", "join", 0, 0).with_mappers(vec![TO_STRING.to_string()]),
      second,
    ],
  );

  let dag = FlowFactory::new(registry).build(&flow).unwrap();
  assert_eq!(dag.len(), 4);
  assert!(dag.node("input_join_0_mapper_0").is_some());
  assert!(dag.node("input_join_e2_mapper_0").is_some());
}

#[test]
fn test_resource_cycle_is_rejected() {
  let registry = Registry::with_builtins();
  registry
    .register_resource(ResourceRegistration::new(
      ResourceMetadata::new("Chained", "chained", "test", "test::Chained")
        .with_parameter(Parameter::resource("Upstream", "upstream", "test::Chained").optional(None)),
      |_| Ok::<_, RegistryError>(()),
    ))
    .unwrap();
  let registry = Arc::new(registry);

  let flow = panel(
    vec![
      resource(&registry, "a", "test::Chained", &[]),
      resource(&registry, "b", "test::Chained", &[]),
    ],
    vec![FlowEdgeData::new("a", "b", 0, 0), FlowEdgeData::new("b", "a", 0, 0)],
  );
  let err = FlowFactory::new(registry).build(&flow).unwrap_err();
  assert!(matches!(err, FlowError::Metadata { ref message } if message.contains("cycle among resources")));
}
