// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use maestro_config::Config;
use maestro_model::{ModelProvider, Role};
use maestro_store::{ConventionScopes, KnowledgeStore, SessionStore, TaskStore};
use maestro_tools::builtin::{BashTool, EditTool, TodoTool};
use maestro_tools::{CommandHook, HookEngine, HookPhase, RuleSet, ToolExecutor, ToolRegistry};

use crate::{
    context::ContextManager,
    coordinator::{SubagentCoordinator, SubagentResult, SubagentRunner, SubagentTask},
    delegate::DelegateTool,
    events::{RunOutcome, RunStatus},
    improve::ImproveHooks,
    prompts::{build_system_prompt, ORCHESTRATOR_PROMPT, SPECIALIST_PROMPT},
    runner::{run_sampling_loop, RunRequest, RunnerDeps},
    selector::{SmartSelector, TaskType},
    session::{CancelToken, LiveSession},
};

/// The top of the control flow: accepts a user task, decides complexity,
/// retrieves past knowledge, runs the sampling loop, and owns the retry
/// loop.  Also the factory for isolated subagent runs, which makes it the
/// runner behind every `delegate` tool call.
pub struct Orchestrator {
    config: Arc<Config>,
    provider: Arc<dyn ModelProvider>,
    selector: Arc<SmartSelector>,
    context: Arc<ContextManager>,
    coordinator: Arc<SubagentCoordinator>,
    improve: Arc<ImproveHooks>,
    sessions: Arc<SessionStore>,
    tasks: Arc<TaskStore>,
    knowledge: Arc<KnowledgeStore>,
    conventions: ConventionScopes,
    workspace: PathBuf,
    project: String,
    self_ref: Mutex<Weak<Orchestrator>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn ModelProvider>,
        sessions: Arc<SessionStore>,
        tasks: Arc<TaskStore>,
        knowledge: Arc<KnowledgeStore>,
        conventions: ConventionScopes,
        workspace: PathBuf,
        project: String,
    ) -> Arc<Self> {
        let selector = Arc::new(SmartSelector::new(
            provider.clone(),
            config.model.clone(),
            config.selector.clone(),
        ));
        let context = Arc::new(ContextManager::new(config.context.clone()));
        let coordinator = Arc::new(SubagentCoordinator::new(config.coordinator.clone()));
        let improve = Arc::new(ImproveHooks::new(knowledge.clone(), config.improve.clone()));
        let orchestrator = Arc::new(Self {
            config,
            provider,
            selector,
            context,
            coordinator,
            improve,
            sessions,
            tasks,
            knowledge,
            conventions,
            workspace,
            project,
            self_ref: Mutex::new(Weak::new()),
        });
        *orchestrator.self_ref.lock().unwrap() = Arc::downgrade(&orchestrator);
        orchestrator
    }

    pub fn improve(&self) -> &Arc<ImproveHooks> {
        &self.improve
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn roles_dir(&self) -> PathBuf {
        self.config.store.config_dir().join("roles")
    }

    /// Assemble the tool surface for an agent at `depth`.  Delegation stays
    /// available below the depth limit; the tool itself refuses deeper
    /// chains, carried by the depth counter in the subagent context.
    fn build_executor(&self, depth: u32) -> Arc<ToolExecutor> {
        let timeout = Duration::from_secs(self.config.tools.timeout_secs);
        let mut registry = ToolRegistry::new();
        registry.register(EditTool::new(&self.workspace));
        registry.register(BashTool::new(&self.workspace, timeout));
        registry.register(TodoTool::new(self.tasks.clone(), &self.project));
        if let Some(me) = self.self_ref.lock().unwrap().upgrade() {
            let runner: Arc<dyn SubagentRunner> = Arc::new(CoordinatedRunner {
                coordinator: self.coordinator.clone(),
                inner: me,
            });
            registry.register(DelegateTool::new(
                self.roles_dir(),
                runner,
                depth,
                self.coordinator.max_depth(),
            ));
        }

        let mut hooks = HookEngine::new();
        for hook_cfg in &self.config.tools.hook_commands {
            match HookPhase::parse(&hook_cfg.phase) {
                Some(phase) => hooks.add(CommandHook::new(
                    phase,
                    hook_cfg.command.clone(),
                    hook_cfg.blocking,
                )),
                None => warn!(phase = %hook_cfg.phase, "unknown hook phase in config; skipped"),
            }
        }

        let rules = RuleSet::from_deny_patterns(&self.config.tools.deny_patterns);
        Arc::new(ToolExecutor::new(
            Arc::new(registry),
            Arc::new(hooks),
            Arc::new(rules),
            timeout,
        ))
    }

    fn runner_deps(&self, depth: u32) -> RunnerDeps {
        RunnerDeps {
            provider: self.provider.clone(),
            selector: self.selector.clone(),
            executor: self.build_executor(depth),
            context: self.context.clone(),
            config: self.config.clone(),
            events: None,
        }
    }

    /// Handle one user task end to end: complexity decision, optional
    /// planning doc, knowledge injection, sampling loop, bounded retries
    /// with selector escalation, post-task capture.
    pub async fn handle_task(&self, session: Arc<LiveSession>, task_text: &str) -> RunOutcome {
        let planning = self.selector.select(task_text, Some("planning"), 0).await;
        debug!(?planning.task_type, tier = %planning.tier, "task classified");
        if planning.task_type == TaskType::Strategic {
            if let Err(e) = self.write_planning_doc(task_text, &planning.rationale) {
                warn!(error = %e, "failed to write planning doc");
            }
        }

        // Conventions: enterprise/project/directory scopes plus anything
        // earlier runs appended to this session.
        let mut convention_blobs = Vec::new();
        if let Some(scoped) = self.conventions.load() {
            convention_blobs.push(scoped);
        }
        if let Some(session_scoped) = session.store().read_conventions() {
            convention_blobs.push(session_scoped);
        }
        let conventions = maestro_store::merge_conventions(&convention_blobs);

        let max_attempts = self.config.loop_.max_attempts.max(1);
        let mut attempt = 0u32;
        let outcome = loop {
            // Fresh retrieval per attempt: a failure may itself have been
            // captured and is now retrievable.
            let retrieved = self.improve.retrieve(task_text);
            let section = ImproveHooks::knowledge_section(&retrieved);
            let system_prompt = build_system_prompt(
                conventions.as_deref(),
                ORCHESTRATOR_PROMPT,
                section.as_deref(),
            );

            let outcome = run_sampling_loop(
                &self.runner_deps(0),
                RunRequest {
                    session: session.clone(),
                    user_message: task_text.to_string(),
                    system_prompt,
                    attempt,
                },
            )
            .await;

            if outcome.status == RunStatus::Error && attempt + 1 < max_attempts {
                attempt += 1;
                info!(attempt, "run failed; retrying with escalated selection");
                continue;
            }
            break outcome;
        };

        self.improve
            .capture_run(&self.project, "orchestrator", task_text, &outcome);

        // Leave a session-scoped note so a resumed conversation knows about
        // the failure without re-reading the knowledge base.
        if outcome.status == RunStatus::Error {
            let note = format!(
                "- A previous run in this session failed: {}",
                outcome.error.as_deref().unwrap_or("unknown error")
            );
            if let Err(e) = session.store().append_conventions(&note) {
                warn!(error = %e, "failed to append session conventions");
            }
        }
        outcome
    }

    fn write_planning_doc(&self, task_text: &str, rationale: &str) -> anyhow::Result<()> {
        let docs_dir = self
            .tasks
            .projects_root()
            .join(&self.project)
            .join(".planning")
            .join("docs");
        std::fs::create_dir_all(&docs_dir)?;
        let doc = format!(
            "# Plan\n\n## Task\n\n{task_text}\n\n## Classification\n\n{rationale}\n\n\
             ## Approach\n\n- Break the task into delegable steps\n- Assign specialists per step\n\
             - Verify each step before moving on\n",
        );
        let path = docs_dir.join(format!("plan-{}.md", &Uuid::new_v4().to_string()[..8]));
        std::fs::write(&path, doc)?;
        debug!(path = %path.display(), "planning doc written");
        Ok(())
    }
}

/// Every subagent runs through the shared coordinator, so concurrent
/// delegations from any depth respect the one global concurrency cap.
struct CoordinatedRunner {
    coordinator: Arc<SubagentCoordinator>,
    inner: Arc<Orchestrator>,
}

#[async_trait]
impl SubagentRunner for CoordinatedRunner {
    async fn run(&self, task: SubagentTask) -> anyhow::Result<SubagentResult> {
        let mut results = self
            .coordinator
            .run_all(vec![task], self.inner.clone(), CancelToken::new())
            .await;
        Ok(results.remove(0))
    }
}

#[async_trait]
impl SubagentRunner for Orchestrator {
    /// One isolated sampling-loop run: fresh session, only the provided
    /// prompt as context, summary out.  The subagent's session id doubles
    /// as the artifacts reference so the caller can inspect it later.
    async fn run(&self, task: SubagentTask) -> anyhow::Result<SubagentResult> {
        let session_id = format!("sub-{}", Uuid::new_v4());
        let dir = self.sessions.create(&session_id)?;
        let live = Arc::new(LiveSession::new(dir, self.config.bridge.sse_queue_depth)?);

        let system_prompt = build_system_prompt(None, SPECIALIST_PROMPT, None);
        let outcome = run_sampling_loop(
            &self.runner_deps(task.depth),
            RunRequest {
                session: live.clone(),
                user_message: task.prompt.clone(),
                system_prompt,
                attempt: 0,
            },
        )
        .await;

        // The summary is the subagent's final text — its inner transcript
        // never reaches the caller.
        let summary = live
            .messages()
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.text())
            .find(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "(subagent produced no text output)".into());

        let success = outcome.success();
        if !success {
            // Decision: failures are captured at the parent's project — the
            // parent owns the task context and drives any retry.
            self.improve
                .capture_run(&self.project, &task.role, &task.prompt, &outcome);
        }
        Ok(SubagentResult {
            task_id: task.task_id,
            success,
            summary: if success {
                summary
            } else {
                outcome.error.unwrap_or(summary)
            },
            artifacts_ref: Some(session_id),
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
