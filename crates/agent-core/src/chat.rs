use std::sync::Arc;

use async_trait::async_trait;

use message_bus::PatchSink;
use research_tree::NodeKind;

use crate::error::AgentError;
use crate::handle::{Agent, AgentParams};
use crate::prompts::{self, HANDLE_MODIFICATION_REQUESTS_PROMPT, MODIFY_SOLUTION_PROMPT};
use crate::runtime::AgentRuntime;
use crate::validators::{
    Decision, HandleModificationRequestsResponse, ModifySolutionResponse, SolutionAction,
};

const SUPERVISOR_NAME: &str = "用户";

/// Conversational agent over one chosen solution. Every user message first
/// goes through an accept-or-reply decision; an accepted modification
/// request is followed by a full solution rewrite that may inherit
/// sub-problems from the prior version.
pub struct UserChatAgent {
    runtime: Arc<AgentRuntime>,
}

impl UserChatAgent {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    /// Phase one: decide whether to rewrite or to answer.
    async fn handle_modification_request(
        &self,
        problem_id: &str,
        solution_id: &str,
        modification_request: &str,
    ) -> Result<HandleModificationRequestsResponse, AgentError> {
        let env = self
            .runtime
            .environment_info(problem_id, Some(modification_request))
            .await?;
        let current_solution = self.runtime.tree().solution_detail(solution_id).await?;
        let message_list = self
            .runtime
            .visible_messages_text(solution_id, NodeKind::Solution)
            .await?;

        let prompt = prompts::render(
            HANDLE_MODIFICATION_REQUESTS_PROMPT,
            &prompts::base_vars(),
        );
        let mut vars = env.vars();
        vars.push(("supervisor_name", SUPERVISOR_NAME));
        vars.push(("modification_request", modification_request));
        vars.push(("current_solution", &current_solution));
        vars.push(("message_list", &message_list));
        let prompt = prompts::render(&prompt, &vars);

        self.runtime
            .call_llm_validated(
                &prompt,
                "处理修改请求",
                solution_id,
                vec![solution_id.to_string()],
            )
            .await
    }

    /// Phase two: rewrite the solution following the accepted plan.
    async fn modify_solution(
        &self,
        problem_id: &str,
        solution_id: &str,
        modify_plan: &str,
    ) -> Result<(), AgentError> {
        let env = self.runtime.environment_info(problem_id, None).await?;
        let current_solution = self.runtime.tree().solution_detail(solution_id).await?;
        let message_list = self
            .runtime
            .visible_messages_text(solution_id, NodeKind::Solution)
            .await?;
        let prior_children = self
            .runtime
            .tree()
            .solution_children_requests(solution_id)
            .await?;
        let sub_problem_titles: Vec<&str> =
            prior_children.iter().map(|c| c.title.as_str()).collect();
        let sub_problem_list = serde_json::to_string(&sub_problem_titles).unwrap_or_default();

        let prompt = prompts::render(MODIFY_SOLUTION_PROMPT, &prompts::base_vars());
        let mut vars = env.vars();
        vars.push(("supervisor_name", SUPERVISOR_NAME));
        vars.push(("modify_plan", modify_plan));
        vars.push(("current_solution", &current_solution));
        vars.push(("message_list", &message_list));
        vars.push(("current_solution_sub_problem_list", &sub_problem_list));
        let prompt = prompts::render(&prompt, &vars);

        let response: ModifySolutionResponse = self
            .runtime
            .call_llm_validated(
                &prompt,
                "修改解决方案",
                solution_id,
                vec![solution_id.to_string()],
            )
            .await?;

        let (action, request) = response.to_request(&prior_children)?;
        let tree = self.runtime.tree().clone();
        let sink: &dyn PatchSink = self.runtime.bus().as_ref();
        match action {
            SolutionAction::Update => {
                self.runtime
                    .execute_action(
                        "update_solution",
                        solution_id,
                        tree.update_solution(solution_id, &request, Some(sink)),
                    )
                    .await?;
            }
            SolutionAction::Create => {
                self.runtime
                    .execute_action(
                        "create_solution",
                        solution_id,
                        tree.create_solution(problem_id, &request, Some(sink)),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Agent for UserChatAgent {
    async fn run(&self, content: String, params: AgentParams) -> Result<(), AgentError> {
        let result = async {
            let solution_id = params
                .solution_id
                .clone()
                .ok_or(AgentError::MissingParam("solution_id"))?;
            // Fails fast when the solution does not exist.
            self.runtime.tree().solution_detail(&solution_id).await?;
            let problem_id = self.runtime.tree().parent_node_id(&solution_id).await?;

            let decision = self
                .handle_modification_request(&problem_id, &solution_id, &content)
                .await?;

            if let Decision::Accept { modification_plan } = &decision.decision {
                self.modify_solution(&problem_id, &solution_id, modification_plan)
                    .await?;
            }
            Ok(())
        }
        .await;

        if let Err(error) = &result {
            self.runtime
                .publish_error(&format!("处理失败: {error}"))
                .await;
        }
        result
    }
}
