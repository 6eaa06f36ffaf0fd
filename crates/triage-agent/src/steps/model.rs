//! Chat model turn.

use triage_ai::Context;

use crate::graph::IncidentGraph;
use crate::state::IncidentState;

impl IncidentGraph {
    /// Send the conversation and the catalog to the model and record its reply.
    pub(crate) async fn call_model(&self, state: &mut IncidentState) {
        let context = Context::new(state.messages.clone(), self.catalog.tools().to_vec());

        match self
            .provider
            .complete(&self.model, &context, &self.config.stream_options)
            .await
        {
            Ok(reply) => {
                let calls = reply.tool_calls();
                tracing::debug!(model = %self.model.id, tool_calls = calls.len(), "model replied");
                self.append(state, reply);
                state.tool_calls = calls;
            }
            Err(e) => self.fail(
                state,
                format!("There was an error communicating with the model. {}", e),
            ),
        }
    }
}
