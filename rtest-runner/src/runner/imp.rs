// Copyright (c) The rtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    channel::{ChannelEvent, ProcessChannel},
    config::AdapterConfig,
    discovery::{RCallScanner, resolve_file, working_dir_for},
    entry_point::{RunMode, RunScope, SynthesisInput, synthesize},
    errors::{RunError, SearchGlobError, TempScriptError},
    list::{NodeId, NodeKind, SourceRange, TestNode, TestTree, normalize_path},
    reporter::RunReporter,
    rscript::InterpreterContext,
    router::{ResultRouter, RouteConfig},
    runner::{CancelFlag, NodeStatus, RunStats, TestRun},
    scoper::scope_source,
    temp_store::TempScriptStore,
    time::stopwatch,
};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use futures::stream::BoxStream;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A request to execute a set of tree nodes.
#[derive(Clone, Debug)]
pub struct RunRequest {
    /// The requested top-level nodes. Empty means every root.
    pub include: Vec<NodeId>,
    /// Nodes whose subtrees are skipped entirely.
    pub exclude: Vec<NodeId>,
    /// Normal or debug execution.
    pub mode: RunMode,
}

impl RunRequest {
    /// A normal-mode request for the given nodes.
    pub fn new(include: Vec<NodeId>) -> Self {
        Self {
            include,
            exclude: Vec::new(),
            mode: RunMode::Normal,
        }
    }
}

/// What a finished run amounted to.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// The run's identifier.
    pub run_id: Uuid,
    /// Terminal-state counts.
    pub stats: RunStats,
    /// When the run started.
    pub start_time: DateTime<Local>,
    /// How long the run took.
    pub duration: Duration,
}

/// Starts debug sessions and exposes their event streams.
///
/// The editor integration implements this over its debug-adapter client; the
/// orchestrator only consumes the resulting event stream.
pub trait DebugSessionLauncher: Send + Sync {
    /// Starts a session running `entry_script` in `cwd` and returns its
    /// channel events.
    fn launch(
        &self,
        entry_script: &Utf8Path,
        cwd: &Utf8Path,
    ) -> Result<BoxStream<'static, ChannelEvent>, RunError>;
}

/// State shared between the orchestrator and its cancel handles.
#[derive(Clone, Debug, Default)]
struct RunnerShared {
    running: Arc<AtomicBool>,
    cancel: CancelFlag,
    active_pid: Arc<Mutex<Option<u32>>>,
}

/// Cancels an in-flight run from outside the orchestrator (a Ctrl-C handler,
/// the editor's cancel button).
#[derive(Clone, Debug)]
pub struct CancelHandle {
    shared: RunnerShared,
}

impl CancelHandle {
    /// Cooperative stop: the queue stops dequeuing, the in-flight process
    /// finishes on its own.
    pub fn stop_after_current(&self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.shared.cancel.cancel();
        }
    }

    /// Hard cancel: signals the flag and tree-kills the active interpreter
    /// process.
    pub fn cancel(&self) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        info!("canceling active test run");
        self.shared.cancel.cancel();
        let pid = *self
            .shared
            .active_pid
            .lock()
            .expect("active pid lock poisoned");
        if let Some(pid) = pid {
            super::os::kill_process_tree(pid);
        }
    }
}

/// Everything node execution needs, separate from the tree and the reporter
/// so the queue loop can borrow all three independently.
struct NodeRunner {
    config: AdapterConfig,
    workspace_root: Utf8PathBuf,
    interpreter: Arc<InterpreterContext>,
    temp_store: TempScriptStore,
    shared: RunnerShared,
    debug_session_probe: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

impl NodeRunner {
    fn write_temp_script(
        &self,
        dir: &Utf8Path,
        content: &str,
    ) -> Result<Utf8PathBuf, TempScriptError> {
        let path = dir.join(format!("rtest-entry-{}.R", Uuid::new_v4().simple()));
        std::fs::write(&path, content).map_err(|err| TempScriptError {
            dir: dir.to_owned(),
            err,
        })?;
        self.temp_store.register(path.clone());
        Ok(path)
    }

    /// Runs one popped node to completion, routing its event stream.
    async fn execute_node<R: RunReporter>(
        &self,
        node: &TestNode,
        tree: &TestTree,
        run: &mut TestRun,
        reporter: &mut R,
        mode: RunMode,
        debug_launcher: Option<&dyn DebugSessionLauncher>,
    ) -> Result<String, RunError> {
        let Some(file) = node.file.clone() else {
            return Ok(String::new());
        };
        let framework = node.framework;
        let scope = match node.kind {
            NodeKind::File { .. } | NodeKind::Package => RunScope::WholeFile,
            NodeKind::Suite => RunScope::SingleSuite,
            NodeKind::Test => RunScope::SingleTest,
        };

        let rscript = self.interpreter.rscript_path().await?.to_owned();
        let devtools = self.interpreter.devtools_version().await?.clone();
        let reporter_path = self
            .config
            .reporter_path
            .clone()
            .ok_or(RunError::ReporterShimNotConfigured)?;

        let file_node = tree.find(&NodeId::from_encoded(normalize_path(file.as_str())));
        let (suite_label, suite_range) = match (scope, file_node) {
            (RunScope::SingleTest, Some(file_node)) => enclosing_suite(file_node, &node.id),
            _ => (None, None),
        };

        // Out-of-scope declarations are blanked in a temporary copy; the
        // original file is executed as-is for whole-file runs.
        let script_target = match (scope, node.range) {
            (RunScope::WholeFile, _) | (_, None) => file.clone(),
            (_, Some(target_range)) => {
                let parent = file.parent().unwrap_or(Utf8Path::new(".")).to_owned();
                let source =
                    tokio::fs::read_to_string(&file)
                        .await
                        .map_err(|err| RunError::SourceRead {
                            path: file.clone(),
                            err,
                        })?;
                let ranges = match file_node {
                    Some(file_node) => collect_ranges(file_node),
                    None => vec![target_range],
                };
                let scoped = scope_source(&source, &ranges, target_range, suite_range);
                self.write_temp_script(&parent, &scoped)?
            }
        };

        let cwd = working_dir_for(&file, framework, &self.workspace_root);
        let input = SynthesisInput {
            target: node,
            enclosing_suite_label: suite_label.as_deref(),
            scope,
            mode,
            test_file: &script_target,
            package_root: &cwd,
            reporter_path: &reporter_path,
            devtools_version: &devtools,
            minimum_version: &self.config.min_devtools_version,
        };
        let entry = synthesize(&input)?;
        let parent = file.parent().unwrap_or(Utf8Path::new(".")).to_owned();
        let entry_path = self.write_temp_script(&parent, &entry)?;
        let route_config = RouteConfig {
            mode,
            highlight: framework.highlight_output(),
            debug_session_active: mode == RunMode::Debug
                || self.debug_session_probe.as_ref().is_some_and(|probe| probe()),
        };

        run.set_status(&node.id, NodeStatus::Running);
        reporter.node_started(&node.id);

        let output = match mode {
            RunMode::Normal => {
                let channel = ProcessChannel::spawn(&rscript, &entry_path, &cwd)?;
                *self
                    .shared
                    .active_pid
                    .lock()
                    .expect("active pid lock poisoned") = channel.pid();
                let result = ResultRouter::new(node, run, reporter, route_config)
                    .route(channel.into_event_stream())
                    .await;
                *self
                    .shared
                    .active_pid
                    .lock()
                    .expect("active pid lock poisoned") = None;
                result?
            }
            RunMode::Debug => {
                let launcher = debug_launcher.ok_or_else(|| RunError::DebugStart {
                    message: "no debug adapter launcher is configured".to_owned(),
                })?;
                let events = launcher.launch(&entry_path, &cwd)?;
                ResultRouter::new(node, run, reporter, route_config)
                    .route(events)
                    .await?
            }
        };

        finalize_node(node, run, reporter);
        Ok(output)
    }
}

/// The run orchestrator: owns the tree, serializes load and run requests,
/// and supervises one interpreter invocation at a time.
pub struct RunOrchestrator<R> {
    executor: NodeRunner,
    parser: RCallScanner,
    debug_launcher: Option<Box<dyn DebugSessionLauncher>>,
    /// The discovered test tree.
    pub tree: TestTree,
    reporter: R,
    is_loading: bool,
}

impl<R: RunReporter> RunOrchestrator<R> {
    /// Creates an orchestrator rooted at `workspace_root`.
    pub fn new(config: AdapterConfig, workspace_root: Utf8PathBuf, reporter: R) -> Self {
        let interpreter = Arc::new(InterpreterContext::new(config.rscript_path.clone()));
        Self {
            executor: NodeRunner {
                config,
                workspace_root,
                interpreter,
                temp_store: TempScriptStore::new(),
                shared: RunnerShared::default(),
                debug_session_probe: None,
            },
            parser: RCallScanner,
            debug_launcher: None,
            tree: TestTree::new(),
            reporter,
            is_loading: false,
        }
    }

    /// Installs the debug session launcher used by debug-mode runs.
    pub fn set_debug_launcher(&mut self, launcher: Box<dyn DebugSessionLauncher>) {
        self.debug_launcher = Some(launcher);
    }

    /// Installs a probe answering "is a debug session active right now".
    pub fn set_debug_session_probe(&mut self, probe: Box<dyn Fn() -> bool + Send + Sync>) {
        self.executor.debug_session_probe = Some(probe);
    }

    /// The reporter.
    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// The reporter, mutably.
    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    /// A handle that can cancel an in-flight run from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: self.executor.shared.clone(),
        }
    }

    /// Hard-cancels the active run, if any.
    pub fn cancel(&mut self) {
        self.cancel_handle().cancel();
    }

    /// Discovers test files and replaces the tree. A load already in
    /// progress causes this request to be ignored.
    pub fn load(&mut self) -> Result<(), SearchGlobError> {
        if self.is_loading {
            info!("ignoring load request: a load is already in progress");
            return Ok(());
        }
        self.is_loading = true;
        info!("loading tests under {}", self.executor.workspace_root);
        let result = crate::discovery::discover(
            &self.executor.workspace_root,
            &self.executor.config,
            &self.executor.temp_store,
        );
        self.is_loading = false;
        self.tree = result?;
        info!("tests loaded: {} nodes", self.tree.len());
        Ok(())
    }

    /// Parses every still-unresolved file in the tree.
    pub fn resolve_all(&mut self) {
        let mut pending: Vec<NodeId> = Vec::new();
        self.tree.for_each(&mut |node| {
            if node.is_unresolved_file() {
                pending.push(node.id.clone());
            }
        });
        for id in pending {
            if let Some(node) = self.tree.find_mut(&id) {
                resolve_from_disk(node, &self.parser);
            }
        }
    }

    /// Re-parses one file after a watcher create/change event. A file with
    /// no node yet (just created) triggers a full reload instead.
    pub fn reparse_file(&mut self, path: &Utf8Path) -> Result<(), SearchGlobError> {
        if self.executor.temp_store.contains(path) {
            return Ok(());
        }
        match self.tree.find_file_mut(path) {
            Some(node) => {
                resolve_from_disk(node, &self.parser);
                Ok(())
            }
            None => self.load(),
        }
    }

    /// Removes a deleted file's node from the tree.
    pub fn remove_file(&mut self, path: &Utf8Path) {
        self.tree.remove_file(path);
    }

    /// Executes a run request to completion.
    ///
    /// Returns `None` when a run is already in progress: concurrent requests
    /// are ignored, not queued. The run-finished signal fires exactly once,
    /// and temporary scripts are cleaned up on every path.
    pub async fn run(&mut self, request: RunRequest) -> Option<RunSummary> {
        if self.executor.shared.running.swap(true, Ordering::SeqCst) {
            info!("ignoring run request: a run is already in progress");
            return None;
        }
        let watch = stopwatch();
        self.executor.shared.cancel.clear();

        let requested = if request.include.is_empty() {
            self.tree.roots.iter().map(|root| root.id.clone()).collect()
        } else {
            request.include.clone()
        };
        let mut run = TestRun::new(requested, request.exclude.iter().cloned().collect());
        run.cancel = self.executor.shared.cancel.clone();
        let run_id = run.run_id;
        info!("test run {run_id} started");
        self.reporter.run_started(run_id, &run.requested);

        let mode = request.mode;
        let executor = &self.executor;
        let parser = &self.parser;
        let debug_launcher = self.debug_launcher.as_deref();
        drain_queue(
            &mut self.tree,
            &mut run,
            &mut self.reporter,
            |node: &mut TestNode| resolve_from_disk(node, parser),
            async |node, tree, run, reporter| {
                executor
                    .execute_node(node, tree, run, reporter, mode, debug_launcher)
                    .await
            },
        )
        .await;

        let snapshot = watch.snapshot();
        self.reporter.run_finished(run_id);
        self.executor.temp_store.cleanup();
        *self
            .executor
            .shared
            .active_pid
            .lock()
            .expect("active pid lock poisoned") = None;
        self.executor.shared.running.store(false, Ordering::SeqCst);
        info!("test run {run_id} finished");

        Some(RunSummary {
            run_id,
            stats: run.stats(),
            start_time: snapshot.start_time,
            duration: snapshot.duration,
        })
    }
}

/// Reads a file from disk and resolves its declarations into the node.
fn resolve_from_disk(node: &mut TestNode, parser: &RCallScanner) {
    let Some(file) = node.file.clone() else {
        return;
    };
    match std::fs::read_to_string(&file) {
        Ok(source) => resolve_file(node, &source, parser),
        Err(err) => {
            warn!("could not read {file}: {err}");
            node.error = Some(err.to_string());
            node.set_children(Vec::new());
        }
    }
}

/// Locates the suite directly containing `id` within a file node.
fn enclosing_suite(
    file_node: &TestNode,
    id: &NodeId,
) -> (Option<String>, Option<SourceRange>) {
    for child in &file_node.children {
        if matches!(child.kind, NodeKind::Suite)
            && child.children.iter().any(|test| &test.id == id)
        {
            return (Some(child.label.clone()), child.range);
        }
    }
    (None, None)
}

/// Every declaration range within a file node's subtree.
fn collect_ranges(file_node: &TestNode) -> Vec<SourceRange> {
    let mut ranges = Vec::new();
    file_node.for_each(&mut |node| {
        if let Some(range) = node.range {
            ranges.push(range);
        }
    });
    ranges
}

fn enqueue_recursively<R: RunReporter>(node: &TestNode, run: &mut TestRun, reporter: &mut R) {
    if run.excluded.contains(&node.id) {
        return;
    }
    run.set_status(&node.id, NodeStatus::Enqueued);
    reporter.node_enqueued(&node.id);
    for child in &node.children {
        enqueue_recursively(child, run, reporter);
    }
}

fn mark_subtree_errored<R: RunReporter>(
    node: &TestNode,
    run: &mut TestRun,
    reporter: &mut R,
    message: &str,
) {
    node.for_each(&mut |descendant| {
        match run.status(&descendant.id) {
            Some(status) if !status.is_terminal() => {
                run.set_status(&descendant.id, NodeStatus::Errored);
                reporter.node_errored(&descendant.id, message, None);
            }
            // Never enqueued (excluded) or already terminal.
            _ => {}
        }
    });
}

/// Derives a container node's terminal state from its descendants once its
/// event stream finished.
fn finalize_node<R: RunReporter>(node: &TestNode, run: &mut TestRun, reporter: &mut R) {
    if run
        .status(&node.id)
        .is_some_and(NodeStatus::is_terminal)
    {
        return;
    }
    let mut stats = RunStats::default();
    for child in &node.children {
        child.for_each(&mut |descendant| match run.status(&descendant.id) {
            Some(NodeStatus::Passed) => stats.passed += 1,
            Some(NodeStatus::Failed) => stats.failed += 1,
            Some(NodeStatus::Skipped) => stats.skipped += 1,
            Some(NodeStatus::Errored) => stats.errored += 1,
            _ => {}
        });
    }
    if stats.errored > 0 {
        run.set_status(&node.id, NodeStatus::Errored);
        reporter.node_errored(&node.id, "one or more tests errored", None);
    } else if stats.failed > 0 {
        run.set_status(&node.id, NodeStatus::Failed);
        reporter.node_failed(&node.id, "one or more tests failed", None);
    } else if stats.passed > 0 {
        run.set_status(&node.id, NodeStatus::Passed);
        reporter.node_passed(&node.id, None);
    } else if stats.skipped > 0 {
        run.set_status(&node.id, NodeStatus::Skipped);
        reporter.node_skipped(&node.id, None);
    } else {
        run.set_status(&node.id, NodeStatus::Errored);
        reporter.node_errored(&node.id, "no test results were reported", None);
    }
}

/// Pops queued nodes one at a time: cancellation is checked before each pop,
/// package nodes expand into their children, unresolved files are parsed on
/// demand, and one node's failure is isolated to its subtree.
pub(crate) async fn drain_queue<R, V, X>(
    tree: &mut TestTree,
    run: &mut TestRun,
    reporter: &mut R,
    mut resolve: V,
    mut execute: X,
) where
    R: RunReporter,
    V: FnMut(&mut TestNode),
    X: AsyncFnMut(&TestNode, &TestTree, &mut TestRun, &mut R) -> Result<String, RunError>,
{
    for id in run.requested.clone() {
        if let Some(node) = tree.find(&id) {
            enqueue_recursively(node, run, reporter);
        }
    }
    debug!("tests are enqueued");

    let mut queue: VecDeque<NodeId> = run.requested.clone().into();
    while let Some(id) = queue.pop_front() {
        if run.cancel.is_cancelled() {
            info!("run cancelled; {} queued node(s) left untouched", queue.len() + 1);
            break;
        }
        if run.excluded.contains(&id) {
            debug!("excluded node skipped: {id}");
            continue;
        }
        let Some(node_ref) = tree.find_mut(&id) else {
            debug!("requested node {id} no longer exists");
            continue;
        };
        if node_ref.is_unresolved_file() {
            resolve(node_ref);
        }
        let node = node_ref.clone();
        if matches!(node.kind, NodeKind::Package) {
            for child in node.children.iter().rev() {
                queue.push_front(child.id.clone());
            }
            continue;
        }

        debug!("running node {id}");
        match execute(&node, &*tree, run, reporter).await {
            Ok(output) => debug!("node {id} produced {} bytes of output", output.len()),
            Err(err) => {
                warn!("run errored with reason {err}");
                mark_subtree_errored(&node, run, reporter, &err.to_string());
                if matches!(
                    err,
                    RunError::Interpreter(_)
                        | RunError::VersionFloor(_)
                        | RunError::ReporterShimNotConfigured
                ) {
                    // These block every remaining node identically; surface
                    // them once and stop dequeuing.
                    reporter.error(&err.to_string());
                    break;
                }
            }
        }
    }
}
