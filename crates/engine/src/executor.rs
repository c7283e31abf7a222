//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Pulls ready batches from the [`ExecutionQueue`] and fans each batch
//!    out to node handlers in parallel, one task per node.
//! 2. Applies result signals (pause, variable writes, route selection,
//!    error-port routing, terminal stops) sequentially in batch order, so
//!    skip decisions stay deterministic.
//! 3. Prunes unreferenced node outputs between batches.
//! 4. Suspends into an in-process table on a pause signal; `resume` injects
//!    the user input into the paused node's output and re-enters the loop.
//!
//! The executor exclusively owns the context and the queue for the duration
//! of a run; handlers only ever see immutable snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use nodes::{
    node_types, HandlerError, LoopControl, NodeHandlerRegistry, NodeHandlerResult, NodeInvocation,
    OutputMap, PauseSignal,
};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::collaborators::{ExecutionStatus, ProgressSink, ProgressUpdate, WaitpointStore};
use crate::context::ContextManager;
use crate::models::WorkflowDefinition;
use crate::plan::{EdgeKind, ExecutionPlan};
use crate::queue::ExecutionQueue;
use crate::{builder, BuildError, ExecutorError};

// ---------------------------------------------------------------------------
// Options and outcome
// ---------------------------------------------------------------------------

/// Per-run tuning passed into [`WorkflowExecutor::run`].
#[derive(Clone)]
pub struct RunOptions {
    /// User on whose behalf the workflow runs.
    pub user_id: String,
    /// Execution id; generated when absent.
    pub execution_id: Option<String>,
    /// Optional client connection id forwarded to handlers.
    pub connection_id: Option<String>,
    /// Cooperative cancellation handle shared with handlers.
    pub cancellation: CancellationToken,
    /// Per-node deadline forwarded through each invocation.
    pub node_timeout: Option<Duration>,
    /// How long to wait for in-flight handlers after cancellation.
    pub grace_period: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            user_id: "system".into(),
            execution_id: None,
            connection_id: None,
            cancellation: CancellationToken::new(),
            node_timeout: None,
            grace_period: Duration::from_secs(5),
        }
    }
}

/// The record every run (or resume) returns. Workflow-level failures are
/// reported here, never thrown.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Every scheduled node completed and none failed.
    pub success: bool,
    /// Final outputs keyed by terminal node id (plus `__variables`); for a
    /// paused run, the partial outputs of the nodes completed so far.
    pub outputs: OutputMap,
    pub completed_nodes: Vec<String>,
    pub failed_nodes: Vec<String>,
    pub skipped_nodes: Vec<String>,
    /// Handler errors keyed by failed node id.
    pub errors: HashMap<String, HandlerError>,
    /// Plan-build warnings carried through for diagnostics.
    pub warnings: Vec<String>,
    /// Workflow-level error (`"canceled"`, blocked), if any.
    pub error: Option<String>,
    /// Set when `status` is `Paused`.
    pub waitpoint_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Orchestrates executions of compiled plans. One instance serves many
/// executions; each run owns a disjoint context/queue pair.
pub struct WorkflowExecutor {
    registry: Arc<NodeHandlerRegistry>,
    waitpoints: Option<Arc<dyn WaitpointStore>>,
    progress: Option<Arc<dyn ProgressSink>>,
    /// Suspended runs awaiting `resume`, keyed by execution id.
    paused: Mutex<HashMap<String, SuspendedRun>>,
}

/// Everything a paused run needs to continue.
struct SuspendedRun {
    state: RunState,
    paused_node_id: String,
    waitpoint_id: String,
}

/// Per-execution mutable state threaded through the main loop.
struct RunState {
    plan: Arc<ExecutionPlan>,
    context: ContextManager,
    queue: ExecutionQueue,
    errors: HashMap<String, HandlerError>,
    execution_id: String,
    user_id: String,
    connection_id: Option<String>,
    cancellation: CancellationToken,
    node_timeout: Option<Duration>,
    grace_period: Duration,
    started_at: DateTime<Utc>,
    prior_elapsed_ms: u64,
    run_started: Instant,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<NodeHandlerRegistry>) -> Self {
        Self {
            registry,
            waitpoints: None,
            progress: None,
            paused: Mutex::new(HashMap::new()),
        }
    }

    /// Attach a waitpoint store (pause signals register tokens there).
    pub fn with_waitpoints(mut self, store: Arc<dyn WaitpointStore>) -> Self {
        self.waitpoints = Some(store);
        self
    }

    /// Attach a progress sink.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Build `definition` and run the resulting plan in one call.
    ///
    /// # Errors
    /// Propagates [`BuildError`]; execution-time failures are reported in
    /// the returned outcome instead.
    pub async fn execute_definition(
        &self,
        definition: &WorkflowDefinition,
        inputs: OutputMap,
        mut options: RunOptions,
    ) -> Result<ExecutionOutcome, BuildError> {
        let execution_id = options
            .execution_id
            .take()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.emit(
            &execution_id,
            ExecutionStatus::BuildingPlan,
            0,
            &[],
            &[],
            &[],
        );
        let plan = Arc::new(builder::build(definition)?);
        options.execution_id = Some(execution_id);
        Ok(self.run(plan, inputs, options).await)
    }

    /// Run a compiled plan to completion, pause, cancellation, or a blocked
    /// state. Never returns an error: every failure mode is encoded in the
    /// outcome record.
    #[instrument(skip_all, fields(workflow_id = %plan.workflow_id))]
    pub async fn run(
        &self,
        plan: Arc<ExecutionPlan>,
        inputs: OutputMap,
        options: RunOptions,
    ) -> ExecutionOutcome {
        let execution_id = options
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(execution_id = %execution_id, nodes = plan.nodes.len(), "starting execution");

        self.emit(&execution_id, ExecutionStatus::Initializing, 0, &[], &[], &[]);

        let state = RunState {
            context: ContextManager::new(inputs),
            queue: ExecutionQueue::new(plan.clone()),
            plan,
            errors: HashMap::new(),
            execution_id,
            user_id: options.user_id,
            connection_id: options.connection_id,
            cancellation: options.cancellation,
            node_timeout: options.node_timeout,
            grace_period: options.grace_period,
            started_at: Utc::now(),
            prior_elapsed_ms: 0,
            run_started: Instant::now(),
        };

        self.drive(state).await
    }

    /// Resume a paused execution with the user's input. The input lands in
    /// the paused node's output as `userInput` and the node is marked
    /// completed before the loop continues.
    ///
    /// # Errors
    /// [`ExecutorError::UnknownExecution`] / [`ExecutorError::UnknownWaitpoint`]
    /// when the pair does not name a run suspended here.
    pub async fn resume(
        &self,
        execution_id: &str,
        waitpoint_id: &str,
        user_input: Value,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let mut injected = OutputMap::new();
        injected.insert("userInput".into(), user_input);
        self.resume_with(execution_id, waitpoint_id, injected).await
    }

    /// Resume a paused execution whose waitpoint expired. The paused node is
    /// still marked completed; its output records the timeout so downstream
    /// logic can decide what to do.
    pub async fn resume_timed_out(
        &self,
        execution_id: &str,
        waitpoint_id: &str,
        error: impl Into<String>,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let mut injected = OutputMap::new();
        injected.insert("waitpointTimedOut".into(), Value::Bool(true));
        injected.insert("waitpointError".into(), Value::String(error.into()));
        self.resume_with(execution_id, waitpoint_id, injected).await
    }

    async fn resume_with(
        &self,
        execution_id: &str,
        waitpoint_id: &str,
        injected: OutputMap,
    ) -> Result<ExecutionOutcome, ExecutorError> {
        let mut run = {
            let mut paused = self.paused.lock().unwrap();
            match paused.get(execution_id) {
                None => return Err(ExecutorError::UnknownExecution(execution_id.to_string())),
                Some(run) if run.waitpoint_id != waitpoint_id => {
                    return Err(ExecutorError::UnknownWaitpoint {
                        execution_id: execution_id.to_string(),
                        waitpoint_id: waitpoint_id.to_string(),
                    });
                }
                Some(_) => paused.remove(execution_id).expect("entry checked above"),
            }
        };

        info!(
            execution_id = %execution_id,
            waitpoint_id = %waitpoint_id,
            node_id = %run.paused_node_id,
            "resuming paused execution"
        );

        let mut output = run
            .state
            .context
            .get_node_output(&run.paused_node_id)
            .cloned()
            .unwrap_or_default();
        output.extend(injected);
        run.state
            .context
            .set_node_output(run.paused_node_id.clone(), output);
        run.state.queue.mark_completed(&run.paused_node_id);
        run.state.run_started = Instant::now();

        Ok(self.drive(run.state).await)
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    async fn drive(&self, mut state: RunState) -> ExecutionOutcome {
        let mut canceled = false;

        while state.queue.has_work() {
            if state.cancellation.is_cancelled() {
                canceled = true;
                break;
            }

            let batch = state.queue.next_batch();
            if batch.is_empty() {
                break; // blocked, or only skip propagation remained
            }
            state.queue.mark_in_progress(&batch);
            debug!(execution_id = %state.execution_id, ?batch, "dispatching batch");
            self.emit_state(&state, ExecutionStatus::Running, &batch);

            let results = self.dispatch_batch(&state, &batch).await;

            let mut pause_request: Option<(String, PauseSignal)> = None;
            for (node_id, result) in results {
                if let Some(pause) = self.apply_result(&mut state, &node_id, result) {
                    // First pause in batch order wins.
                    pause_request.get_or_insert((node_id, pause));
                }
            }

            if let Some((node_id, pause)) = pause_request {
                return self.suspend(state, node_id, pause).await;
            }

            let needed = still_needed(&state);
            state.context.prune_unused_outputs(&needed);
        }

        self.finish(state, canceled)
    }

    /// Fan a batch out to the registry, one task per node, and collect the
    /// results back in batch order.
    async fn dispatch_batch(
        &self,
        state: &RunState,
        batch: &[String],
    ) -> Vec<(String, NodeHandlerResult)> {
        let snapshot = state.context.snapshot();
        let deadline = state
            .node_timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| Utc::now() + t);

        let mut handles = Vec::with_capacity(batch.len());
        for node_id in batch {
            let Some(node) = state.plan.node(node_id) else {
                continue;
            };
            let invocation = NodeInvocation {
                node_id: node_id.clone(),
                node_type: node.node_type.clone(),
                node_name: node.name.clone(),
                config: node.config.clone(),
                snapshot: snapshot.clone(),
                user_id: state.user_id.clone(),
                execution_id: state.execution_id.clone(),
                connection_id: state.connection_id.clone(),
                deadline,
                cancellation: state.cancellation.clone(),
            };
            let registry = Arc::clone(&self.registry);
            handles.push((
                node_id.clone(),
                tokio::spawn(async move { registry.dispatch(&invocation).await }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (node_id, handle) in handles {
            // After cancellation, give in-flight handlers the grace period
            // and no more.
            let joined = if state.cancellation.is_cancelled() {
                let abort = handle.abort_handle();
                match tokio::time::timeout(state.grace_period, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        abort.abort();
                        warn!(node_id = %node_id, "handler ignored cancellation; aborted");
                        results.push((
                            node_id,
                            NodeHandlerResult::failure(
                                HandlerError::fatal("canceled").with_code("canceled"),
                            ),
                        ));
                        continue;
                    }
                }
            } else {
                handle.await
            };

            let result = match joined {
                Ok(result) => result,
                Err(join_error) => NodeHandlerResult::failure(
                    HandlerError::fatal(format!("handler panicked: {join_error}"))
                        .with_code("handler-panic"),
                ),
            };
            results.push((node_id, result));
        }
        results
    }

    // -----------------------------------------------------------------------
    // Result application (sequential, batch order)
    // -----------------------------------------------------------------------

    /// Apply one node result. Returns the pause signal when the node asked
    /// to suspend; the caller stops the run after the batch's bookkeeping.
    fn apply_result(
        &self,
        state: &mut RunState,
        node_id: &str,
        result: NodeHandlerResult,
    ) -> Option<PauseSignal> {
        let plan = state.plan.clone();
        let Some(node) = plan.node(node_id) else {
            return None;
        };

        let signals = result.signals.unwrap_or_default();
        let failing = !result.success || signals.activate_error_port;

        // Store the output first so error-port dependents (and resumes) can
        // see it. Failures expose their error as `__error`.
        let mut data = result.data.unwrap_or_default();
        if failing {
            let error = result
                .error
                .unwrap_or_else(|| HandlerError::fatal("handler reported failure"));
            data.insert(
                "__error".into(),
                serde_json::to_value(&error).unwrap_or(Value::Null),
            );
            state.errors.insert(node_id.to_string(), error);
        }
        state.context.set_node_output(node_id, data);

        if let Some(pause) = signals.pause {
            info!(
                execution_id = %state.execution_id,
                node_id = %node_id,
                waitpoint_id = %pause.waitpoint_id,
                reason = %pause.reason,
                "node requested pause"
            );
            return Some(pause);
        }

        if let Some(variables) = signals.set_variables {
            for (name, value) in variables {
                if value.is_null() {
                    state.context.delete_variable(&name);
                } else {
                    state.context.set_variable(name, value);
                }
            }
        }

        if let Some(route) = &signals.selected_route {
            skip_unselected_routes(state, node_id, route);
        }

        if node.has_error_port {
            skip_error_routing(state, node_id, failing);
        }

        if !failing {
            if signals.is_terminal {
                for dependent in &node.dependents {
                    state.queue.mark_skipped(dependent);
                }
            }
            apply_boundary_scopes(state, node_id, signals.loop_control);
        }

        if failing {
            warn!(execution_id = %state.execution_id, node_id = %node_id, "node failed");
            state.queue.mark_failed(node_id);
        } else {
            state.queue.mark_completed(node_id);
        }
        None
    }

    // -----------------------------------------------------------------------
    // Suspension and completion
    // -----------------------------------------------------------------------

    async fn suspend(
        &self,
        state: RunState,
        paused_node_id: String,
        pause: PauseSignal,
    ) -> ExecutionOutcome {
        if let Some(store) = &self.waitpoints {
            store
                .create(
                    &pause.waitpoint_id,
                    pause.timeout_ms,
                    vec![state.execution_id.clone(), paused_node_id.clone()],
                )
                .await;
        }

        let partial = state.context.final_outputs(&state.queue.completed_ids());
        let duration_ms =
            state.prior_elapsed_ms + state.run_started.elapsed().as_millis() as u64;
        let outcome = ExecutionOutcome {
            execution_id: state.execution_id.clone(),
            status: ExecutionStatus::Paused,
            success: false,
            outputs: partial,
            completed_nodes: state.queue.completed_ids(),
            failed_nodes: state.queue.failed_ids(),
            skipped_nodes: state.queue.skipped_ids(),
            errors: state.errors.clone(),
            warnings: state.plan.warnings.clone(),
            error: None,
            waitpoint_id: Some(pause.waitpoint_id.clone()),
            started_at: state.started_at,
            finished_at: Utc::now(),
            duration_ms,
        };
        self.emit_state(&state, ExecutionStatus::Paused, &[]);

        let mut state = state;
        state.prior_elapsed_ms = duration_ms;
        self.paused.lock().unwrap().insert(
            state.execution_id.clone(),
            SuspendedRun {
                state,
                paused_node_id,
                waitpoint_id: pause.waitpoint_id,
            },
        );
        outcome
    }

    fn finish(&self, mut state: RunState, canceled: bool) -> ExecutionOutcome {
        let blocked = !canceled && state.queue.has_work();
        // Whatever could not run is reported as skipped.
        for id in state.queue.pending_ids() {
            state.queue.mark_skipped(&id);
        }

        let completed = state.queue.completed_ids();
        let failed = state.queue.failed_ids();
        let mut skipped = state.queue.skipped_ids();
        skipped.extend(state.plan.unscheduled_ids());
        skipped.sort();
        skipped.dedup();

        // Final outputs come from completed terminal nodes; completed leaves
        // stand in when the definition has no typed terminal.
        let mut source_ids: Vec<String> = state
            .plan
            .terminal_ids()
            .into_iter()
            .filter(|id| state.queue.is_completed(id))
            .collect();
        if source_ids.is_empty() {
            source_ids = state
                .plan
                .leaf_ids()
                .into_iter()
                .filter(|id| state.queue.is_completed(id))
                .collect();
        }
        let outputs = state.context.final_outputs(&source_ids);

        let success = !canceled && !blocked && state.queue.is_successful();
        let (status, error) = if canceled {
            (ExecutionStatus::Canceled, Some("canceled".to_string()))
        } else if blocked {
            (
                ExecutionStatus::Failed,
                Some("execution blocked; isolated nodes were skipped".to_string()),
            )
        } else if failed.is_empty() {
            (ExecutionStatus::Completed, None)
        } else {
            let first_error = failed
                .first()
                .and_then(|id| state.errors.get(id))
                .map(|e| e.message.clone());
            if completed.is_empty() {
                (ExecutionStatus::Failed, first_error)
            } else {
                (ExecutionStatus::CompletedWithErrors, first_error)
            }
        };

        info!(
            execution_id = %state.execution_id,
            ?status,
            completed = completed.len(),
            failed = failed.len(),
            skipped = skipped.len(),
            "execution finished"
        );
        self.emit_state(&state, status, &[]);

        ExecutionOutcome {
            execution_id: state.execution_id,
            status,
            success,
            outputs,
            completed_nodes: completed,
            failed_nodes: failed,
            skipped_nodes: skipped,
            errors: state.errors,
            warnings: state.plan.warnings.clone(),
            error,
            waitpoint_id: None,
            started_at: state.started_at,
            finished_at: Utc::now(),
            duration_ms: state.prior_elapsed_ms + state.run_started.elapsed().as_millis() as u64,
        }
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    fn emit_state(&self, state: &RunState, status: ExecutionStatus, batch: &[String]) {
        self.emit(
            &state.execution_id,
            status,
            state.queue.progress(),
            &state.queue.completed_ids(),
            &state.queue.failed_ids(),
            batch,
        );
    }

    fn emit(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        progress: u8,
        completed: &[String],
        failed: &[String],
        batch: &[String],
    ) {
        if let Some(sink) = &self.progress {
            sink.update(ProgressUpdate {
                execution_id: execution_id.to_string(),
                status,
                progress,
                completed: completed.to_vec(),
                failed: failed.to_vec(),
                current_batch: batch.to_vec(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Free helpers over the run state
// ---------------------------------------------------------------------------

/// Union of the dependencies of everything still pending, plus terminal
/// outputs (they feed the final outputs at the end).
fn still_needed(state: &RunState) -> HashSet<String> {
    let mut needed: HashSet<String> = HashSet::new();
    for id in state.queue.pending_ids() {
        if let Some(node) = state.plan.node(&id) {
            needed.extend(node.dependencies.iter().cloned());
        }
    }
    needed.extend(state.plan.terminal_ids());
    needed.extend(state.plan.leaf_ids());
    needed
}

/// Skip dependents of a routing node that are wired only to ports other
/// than the selected route. Portless edges stay route-neutral.
fn skip_unselected_routes(state: &mut RunState, node_id: &str, route: &str) {
    let plan = state.plan.clone();
    let Some(node) = plan.node(node_id) else {
        return;
    };
    for dependent in &node.dependents {
        let eligible = plan.edges_between(node_id, dependent).any(|edge| {
            edge.kind != EdgeKind::Error
                && (edge.source_port.is_none() || edge.source_port.as_deref() == Some(route))
        });
        if !eligible {
            debug!(node_id = %dependent, %route, "dependent not on selected route; skipped");
            state.queue.mark_skipped(dependent);
        }
    }
}

/// Route around an error port: on failure only error-port dependents stay
/// eligible; on success the error-port-only dependents are skipped.
fn skip_error_routing(state: &mut RunState, node_id: &str, failing: bool) {
    let plan = state.plan.clone();
    let Some(node) = plan.node(node_id) else {
        return;
    };
    for dependent in &node.dependents {
        let via_error = plan
            .edges_between(node_id, dependent)
            .any(|e| e.kind == EdgeKind::Error);
        let via_normal = plan
            .edges_between(node_id, dependent)
            .any(|e| e.kind != EdgeKind::Error);

        let skip = if failing { !via_error } else { via_error && !via_normal };
        if skip {
            state.queue.mark_skipped(dependent);
        }
    }
}

/// Scope bookkeeping at loop/parallel boundary nodes. Every node still runs
/// exactly once per execution; the scopes only shape what snapshots expose.
fn apply_boundary_scopes(state: &mut RunState, node_id: &str, loop_control: Option<LoopControl>) {
    let plan = state.plan.clone();
    let Some(node) = plan.node(node_id) else {
        return;
    };

    match node.node_type.as_str() {
        node_types::LOOP_START => {
            let (first_item, total) = state
                .context
                .get_node_output(node_id)
                .and_then(|output| output.get("items"))
                .and_then(Value::as_array)
                .map(|items| (items.first().cloned().unwrap_or(Value::Null), Some(items.len())))
                .unwrap_or((Value::Null, None));
            state.context.enter_loop(node_id, 0, first_item, total);
        }
        node_types::LOOP_END => {
            // Each node runs exactly once per execution, so the scope closes
            // here either way; the control decision is surfaced for layers
            // that replay loop bodies.
            if let Some(scope) = state.context.exit_loop() {
                debug!(
                    loop_id = %scope.loop_id,
                    index = scope.index,
                    control = ?loop_control.unwrap_or(LoopControl::Break),
                    "loop boundary closed"
                );
            }
        }
        node_types::PARALLEL_START => state.context.enter_parallel(node_id, 0),
        node_types::PARALLEL_END => {
            state.context.exit_parallel();
        }
        _ => {}
    }
}
