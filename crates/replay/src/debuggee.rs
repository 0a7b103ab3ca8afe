use std::{
    collections::{BTreeMap, VecDeque},
    sync::Mutex,
};

use futures::{FutureExt, future::BoxFuture};
use session::{DebuggeeClient, RequestBody, ResponseBody, Scope, SymbolDeclarations};

use crate::scenario::Scripted;

/// Answers requests from the scenario's response table.
///
/// Requests without a scripted answer get a neutral one: an empty result for
/// queries, an error per input for evaluations and an acknowledgement for
/// everything else.
pub struct ScriptedDebuggee {
    responses: Mutex<BTreeMap<String, VecDeque<Scripted>>>,
}

impl ScriptedDebuggee {
    pub fn new(responses: BTreeMap<String, VecDeque<Scripted>>) -> Self {
        Self {
            responses: Mutex::new(responses),
        }
    }

    fn next_scripted(&self, name: &str) -> Option<Scripted> {
        let mut responses = match self.responses.lock() {
            Ok(responses) => responses,
            Err(poisoned) => poisoned.into_inner(),
        };
        responses.get_mut(name).and_then(VecDeque::pop_front)
    }
}

fn unscripted(request: &RequestBody) -> ResponseBody {
    match request {
        RequestBody::Evaluate { inputs, .. } => ResponseBody::Evaluated(
            inputs
                .iter()
                .map(|input| Err(format!("no scripted result for {input:?}")))
                .collect(),
        ),
        RequestBody::Scopes { .. } => ResponseBody::Scopes(Scope::default()),
        RequestBody::MapScopes { .. } => ResponseBody::MappedScopes(Default::default()),
        RequestBody::Symbols { .. } => ResponseBody::Symbols(SymbolDeclarations::default()),
        _ => ResponseBody::Ack,
    }
}

impl DebuggeeClient for ScriptedDebuggee {
    fn send(&self, request: RequestBody) -> BoxFuture<'static, eyre::Result<ResponseBody>> {
        let name = request.name();
        let outcome = match self.next_scripted(name) {
            Some(Scripted::Ok(body)) => Ok(body),
            Some(Scripted::Error(message)) => Err(eyre::eyre!(message)),
            None => {
                tracing::debug!(request = name, "no scripted response, using default");
                Ok(unscripted(&request))
            }
        };
        tracing::trace!(request = name, ?outcome, "answering request");
        futures::future::ready(outcome).boxed()
    }
}
