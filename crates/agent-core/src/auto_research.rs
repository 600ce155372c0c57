use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use message_bus::PatchSink;
use research_tree::NodeKind;

use crate::error::AgentError;
use crate::handle::{Agent, AgentParams};
use crate::prompts::{self, CREATE_SOLUTION_PROMPT};
use crate::runtime::AgentRuntime;
use crate::validators::CreateSolutionResponse;
use crate::xml::XmlError;

/// Queue entry of the breadth-first expansion: the problem to work on, the
/// solution that supervises it (none for the user-seeded root) and an
/// optional user requirement injected into the prompt.
///
/// The supervisor id is recorded but not consumed; the review pathway it
/// would feed is not part of this system.
type QueueEntry = (String, Option<String>, Option<String>);

/// Breadth-first solution expansion. For each queued implementation problem
/// the agent either descends into the already selected solution's
/// sub-problems or asks the LLM to design a new solution and enqueues the
/// sub-problems that come back.
pub struct AutoResearchAgent {
    runtime: Arc<AgentRuntime>,
}

impl AutoResearchAgent {
    pub fn new(runtime: Arc<AgentRuntime>) -> Self {
        Self { runtime }
    }

    async fn process_queue(&self, mut queue: VecDeque<QueueEntry>) -> Result<(), AgentError> {
        while let Some((problem_id, supervisor_id, user_requirement)) = queue.pop_front() {
            log::info!(
                "[auto_research] processing problem {} (supervisor: {:?})",
                problem_id,
                supervisor_id
            );

            match self.runtime.tree().selected_solution_id(&problem_id).await? {
                Some(solution_id) => {
                    self.enqueue_sub_problems(&mut queue, &solution_id).await?;
                }
                None => {
                    let solution_id = self
                        .create_solution_for(&problem_id, user_requirement.as_deref())
                        .await?;
                    self.enqueue_sub_problems(&mut queue, &solution_id).await?;
                }
            }
        }
        Ok(())
    }

    /// Push the implementation-type children of a solution, supervised by
    /// that solution.
    async fn enqueue_sub_problems(
        &self,
        queue: &mut VecDeque<QueueEntry>,
        solution_id: &str,
    ) -> Result<(), AgentError> {
        let children = self
            .runtime
            .tree()
            .node_children_ids(solution_id, true)
            .await?;
        for child_id in children {
            queue.push_back((child_id, Some(solution_id.to_string()), None));
        }
        Ok(())
    }

    /// Design a solution for an unsolved problem and commit it. Returns the
    /// new solution's id.
    async fn create_solution_for(
        &self,
        problem_id: &str,
        user_requirement: Option<&str>,
    ) -> Result<String, AgentError> {
        let env = self
            .runtime
            .environment_info(problem_id, user_requirement)
            .await?;
        let prompt = prompts::render(CREATE_SOLUTION_PROMPT, &prompts::base_vars());
        let prompt = prompts::render(&prompt, &env.vars());

        let response: CreateSolutionResponse = self
            .runtime
            .call_llm_validated(
                &prompt,
                "创建解决方案",
                problem_id,
                vec![problem_id.to_string()],
            )
            .await?;

        let request = response.to_request();
        let tree = self.runtime.tree().clone();
        let sink: &dyn PatchSink = self.runtime.bus().as_ref();
        self.runtime
            .execute_action(
                "create_solution",
                problem_id,
                tree.create_solution(problem_id, &request, Some(sink)),
            )
            .await?;

        self.runtime
            .tree()
            .node_id_by_title(&request.title, Some(NodeKind::Solution))
            .await
            .ok_or_else(|| {
                AgentError::Xml(XmlError::validation(format!(
                    "created solution not found by title: {}",
                    request.title
                )))
            })
    }
}

#[async_trait]
impl Agent for AutoResearchAgent {
    async fn run(&self, content: String, params: AgentParams) -> Result<(), AgentError> {
        let result = async {
            let problem_id = params
                .problem_id
                .clone()
                .ok_or(AgentError::MissingParam("problem_id"))?;
            // Fails fast when the seed problem does not exist.
            self.runtime.tree().problem_detail(&problem_id).await?;

            let mut queue = VecDeque::new();
            queue.push_back((problem_id, None, Some(content)));
            self.process_queue(queue).await
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
