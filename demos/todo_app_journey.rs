//! Demonstrates lifting a small combinatorial spec for a todo-list API
//! into a state graph, then exploring and replaying it end to end.
//!
//! This example shows:
//! - Declaring a dimension space and registering setups/transitions
//! - Printing the builder's coverage-gap summary before building
//! - Running the live executor (graph exploration + combination replay)

use std::cell::RefCell;

use stategraph_core::{
    ActionResponse, CombinatorialExecutor, CombinatorialGraphBuilder, ConstraintSet, Context,
    Dimension, DimensionSpace,
};

/// A minimal stand-in for an HTTP client against a todo-list API.
/// Real actions would issue requests; this one just records calls.
#[derive(Default)]
struct TodoClient {
    calls: RefCell<Vec<String>>,
}

impl TodoClient {
    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }
}

fn unit_response() -> Result<Box<dyn ActionResponse>, String> {
    Ok(Box::new(()))
}

fn main() {
    println!("=== Todo App Journey ===\n");

    let space = DimensionSpace::new(vec![
        Dimension::new(
            "auth",
            vec!["anonymous".into(), "authenticated".into()],
            Some("whether the caller is signed in".to_string()),
            None,
        )
        .expect("valid dimension"),
        Dimension::new(
            "list_size",
            vec![0i64.into(), 1i64.into(), 5i64.into()],
            Some("how many todo items already exist".to_string()),
            None,
        )
        .expect("valid dimension"),
    ])
    .expect("unique dimension names");

    let mut builder: CombinatorialGraphBuilder<TodoClient, ()> =
        CombinatorialGraphBuilder::new("todo_app", space, ConstraintSet::default());

    builder
        .register_setup(
            "auth",
            "authenticated".into(),
            |client: &TodoClient, _ctx: &mut Context| {
                client.record("login");
                unit_response()
            },
        )
        .expect("auth=authenticated is a declared value");

    builder
        .register_setup(
            "list_size",
            5i64.into(),
            |client: &TodoClient, _ctx: &mut Context| {
                client.record("seed_five_items");
                unit_response()
            },
        )
        .expect("list_size=5 is a declared value");

    builder
        .register_transition(
            "auth",
            "anonymous".into(),
            "authenticated".into(),
            |client: &TodoClient, _ctx: &mut Context| {
                client.record("sign_in");
                unit_response()
            },
        )
        .expect("auth anonymous->authenticated is declared");

    println!("{}\n", builder.summary(2));

    let client = TodoClient::default();
    let executor = CombinatorialExecutor::new(&builder);
    let result = executor
        .execute(&client, None, 2, 10, false, true, false, None)
        .expect("this builder is not over-constrained");

    println!("{}\n", result.summary());
    println!("Calls recorded against the client: {:?}", client.calls.borrow());
}
