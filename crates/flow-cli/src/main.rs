//! flow-cli: a thin demo binary that registers a couple of script steps,
//! starts a flow, runs it to completion against an in-memory store, and
//! prints the resulting state (§1, §9). Not an HTTP API or a flag-rich CLI
//! — those are explicitly out of scope; this is a development smoke test
//! for the engine.

use std::sync::Arc;

use flow_core::model::{
    AttributeDecl, AttributeRole, AttributeType, BackoffType, ScriptLanguage, ScriptSpec, Step, StepKind, WorkConfig,
};
use flow_core::InMemoryEventStore;
use flow_cli::Engine;
use indexmap::IndexMap;
use serde_json::json;

fn double_step() -> Step {
    let mut attributes = IndexMap::new();
    attributes.insert("n".to_string(), AttributeDecl { role: AttributeRole::Required, ty: AttributeType::Number, default: None, for_each: false });
    attributes.insert("doubled".to_string(), AttributeDecl { role: AttributeRole::Output, ty: AttributeType::Number, default: None, for_each: false });
    Step {
        id: "double".into(),
        name: "double".to_string(),
        version: 1,
        kind: StepKind::Script,
        attributes,
        predicate: None,
        http: None,
        script: Some(ScriptSpec { language: ScriptLanguage::Expression, source: "(object \"doubled\" (* n 2))".to_string() }),
        flow: None,
        work_config: None,
        memoizable: false,
        labels: IndexMap::new(),
    }
}

fn greet_step() -> Step {
    let mut attributes = IndexMap::new();
    attributes.insert("doubled".to_string(), AttributeDecl { role: AttributeRole::Required, ty: AttributeType::Number, default: None, for_each: false });
    attributes.insert("greeting".to_string(), AttributeDecl { role: AttributeRole::Output, ty: AttributeType::String, default: None, for_each: false });
    Step {
        id: "greet".into(),
        name: "greet".to_string(),
        version: 1,
        kind: StepKind::Script,
        attributes,
        predicate: None,
        http: None,
        script: Some(ScriptSpec {
            language: ScriptLanguage::Expression,
            source: "(if (> doubled 5) (object \"greeting\" \"big\") (object \"greeting\" \"small\"))".to_string(),
        }),
        flow: None,
        work_config: None,
        memoizable: false,
        labels: IndexMap::new(),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    flow_config::init_dotenv();

    println!("flow-cli");
    println!("========");

    let retry_defaults = WorkConfig { max_retries: 3, initial_backoff_ms: 100, max_backoff_ms: 30_000, backoff_type: BackoffType::Exponential };
    let store = Arc::new(InMemoryEventStore::new());
    let (engine, retry_rx) = Engine::new(store, retry_defaults, None);

    let runner = tokio::spawn(Arc::clone(&engine).run(retry_rx));

    if let Err(e) = engine.register_step(double_step()).await {
        println!("failed to register 'double': {e}");
        return;
    }
    if let Err(e) = engine.register_step(greet_step()).await {
        println!("failed to register 'greet': {e}");
        return;
    }

    match engine.start_flow(vec!["greet".into()], json!({"n": 4}), json!({"source": "flow-cli demo"})).await {
        Ok(state) => {
            println!("flow {} finished as {:?}", state.id, state.status);
            for (name, attr) in &state.attributes {
                println!("  {name} = {} (from {})", attr.value, attr.producing_step);
            }
        }
        Err(e) => println!("flow failed to start: {e}"),
    }

    runner.abort();
}
