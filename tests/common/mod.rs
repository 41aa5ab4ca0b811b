//! Recording fakes of every module role, shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use simflow::config::{Configuration, ConfigurationBuilder};
use simflow::error::{Result, WorkflowError};
use simflow::files;
use simflow::modules::{
    sum_residuals, AdjointRequest, CapabilityBundle, Component, Force, ForwardRequest,
    MisfitKind, MisfitRequest, Module, Optimizer, Processing, RotationRequest, SearchStatus,
    SerialDispatcher, SimulationDriver, UnitOfWork,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Working directory with an initial model, a target model and one data
/// file per source.
pub fn workspace(root: &Path, sources: &[&str]) -> ConfigurationBuilder {
    let model_init = root.join("models").join("init");
    let model_true = root.join("models").join("true");
    fs::create_dir_all(&model_init).unwrap();
    fs::create_dir_all(&model_true).unwrap();
    fs::write(model_init.join("vp.bin"), "init").unwrap();
    fs::write(model_true.join("vp.bin"), "true").unwrap();

    for source in sources {
        let data = root.join("data").join(source);
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join(format!("{}.BXZ", source)), "obs").unwrap();
    }

    Configuration::builder(root)
        .model_init(model_init)
        .model_true(model_true)
}

/// Cross-correlation data sorted by kernel, as the noise workflow expects.
pub fn noise_data(root: &Path, sources: &[&str], kernels: &[&str]) {
    for source in sources {
        for kernel in kernels {
            let dir = root.join("data").join(source).join(kernel);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{}.{}.sac", source, kernel)), "xcorr").unwrap();
        }
    }
}

pub struct FakeSolver {
    sources: Vec<String>,
    scratch: PathBuf,
    pub log: CallLog,
}

impl FakeSolver {
    pub fn new(sources: &[&str], scratch: impl Into<PathBuf>) -> Self {
        Self {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            scratch: scratch.into(),
            log: CallLog::default(),
        }
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl Module for FakeSolver {
    fn name(&self) -> &str {
        "fake_solver"
    }

    fn setup(&self) -> Result<()> {
        for source in &self.sources {
            for tag in ["obs", "syn", "adj"] {
                files::ensure_dir(&self.unit_dir(source).join("traces").join(tag))?;
            }
        }
        Ok(())
    }
}

impl SimulationDriver for FakeSolver {
    fn source_names(&self) -> Vec<String> {
        self.sources.clone()
    }

    fn unit_dir(&self, source: &str) -> PathBuf {
        self.scratch.join(source)
    }

    fn check_model_values(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(WorkflowError::step(format!("no model at {}", path.display())));
        }
        Ok(())
    }

    fn import_model(&self, unit: &UnitOfWork, path: &Path) -> Result<()> {
        let model = path.file_name().unwrap().to_string_lossy().to_string();
        self.record(format!("import:{}:{}", unit.name, model));
        Ok(())
    }

    fn forward_simulation(&self, unit: &UnitOfWork, request: &ForwardRequest) -> Result<()> {
        let target = request.save_traces.file_name().unwrap().to_string_lossy().to_string();
        self.record(format!("forward:{}:{}", unit.name, target));
        files::ensure_dir(&request.save_traces)?;
        fs::write(request.save_traces.join(format!("{}.BXZ", unit.name)), "syn")
            .map_err(|e| WorkflowError::io(&request.save_traces, e))
    }

    fn adjoint_simulation(&self, unit: &UnitOfWork, request: &AdjointRequest) -> Result<()> {
        let target = request.save_kernels.file_name().unwrap().to_string_lossy().to_string();
        self.record(format!("adjoint:{}:{}", unit.name, target));
        files::ensure_dir(&request.save_kernels)?;
        fs::write(request.save_kernels.join("kernel.bin"), "k")
            .map_err(|e| WorkflowError::io(&request.save_kernels, e))
    }

    fn combine_kernels(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let target = output.file_name().unwrap().to_string_lossy().to_string();
        self.record(format!("combine:{}:{}", inputs.len(), target));
        files::ensure_dir(output)?;
        fs::write(output.join("kernel.bin"), inputs.len().to_string())
            .map_err(|e| WorkflowError::io(output, e))
    }

    fn set_point_force(&self, unit: &UnitOfWork, force: Force) -> Result<()> {
        self.record(format!("force:{}:{}", unit.name, force));
        Ok(())
    }
}

pub struct FakeProcessing {
    rotation: bool,
    residual: f64,
    pub log: CallLog,
}

impl FakeProcessing {
    pub fn new(residual: f64) -> Self {
        Self {
            rotation: false,
            residual,
            log: CallLog::default(),
        }
    }

    pub fn with_rotation(mut self) -> Self {
        self.rotation = true;
        self
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

fn component_list(components: &[Component]) -> String {
    components.iter().map(|c| c.as_str()).collect::<Vec<_>>().join("")
}

impl Module for FakeProcessing {
    fn name(&self) -> &str {
        "fake_processing"
    }
}

impl Processing for FakeProcessing {
    fn quantify_misfit(&self, unit: &UnitOfWork, request: &MisfitRequest) -> Result<()> {
        if !files::has_files(&request.obs_dir)? {
            return Err(WorkflowError::step(format!("no observations for {}", unit.name)));
        }
        let components = request.components.clone().unwrap_or_default();
        self.record(format!("misfit:{}:{}", unit.name, component_list(&components)));

        files::ensure_dir(&request.save_adjsrcs)?;
        fs::write(request.save_adjsrcs.join(format!("{}.adj", unit.name)), "adj")
            .map_err(|e| WorkflowError::io(&request.save_adjsrcs, e))?;
        if let Some(path) = &request.save_residuals {
            fs::write(path, format!("{}\n", self.residual)).map_err(|e| WorkflowError::io(path, e))?;
        }
        Ok(())
    }

    fn supports_rotation(&self) -> bool {
        self.rotation
    }

    fn rotate_ne_to_rt(&self, unit: &UnitOfWork, request: &RotationRequest) -> Result<()> {
        self.record(format!("rotate:{}:{}", unit.name, component_list(&request.components)));
        files::ensure_dir(&request.output)?;
        for component in &request.components {
            fs::write(request.output.join(format!("{}.BX{}", unit.name, component)), "rt")
                .map_err(|e| WorkflowError::io(&request.output, e))?;
        }
        Ok(())
    }

    fn rotate_rt_adjsrcs_to_ne(
        &self,
        unit: &UnitOfWork,
        adj_dir: &Path,
        component: Component,
    ) -> Result<()> {
        self.record(format!("unrotate:{}:{}", unit.name, component));
        let parent = adj_dir.parent().unwrap();
        for force in ["n", "e"] {
            let dir = parent.join(format!("adj_{}{}", force, component.as_str().to_lowercase()));
            files::ensure_dir(&dir)?;
            fs::write(dir.join(format!("{}.BX{}.adj", unit.name, force.to_uppercase())), "ne")
                .map_err(|e| WorkflowError::io(&dir, e))?;
        }
        Ok(())
    }

    fn write_zero_adjsrcs(
        &self,
        unit: &UnitOfWork,
        adj_dir: &Path,
        components: &[Component],
    ) -> Result<()> {
        self.record(format!("zero:{}:{}", unit.name, component_list(components)));
        files::ensure_dir(adj_dir)?;
        for component in components {
            fs::write(adj_dir.join(format!("{}.BX{}.adj", unit.name, component)), "0")
                .map_err(|e| WorkflowError::io(adj_dir, e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct OptimizerState {
    iteration: usize,
    step: usize,
    verdicts: VecDeque<SearchStatus>,
    misfits: Vec<(MisfitKind, f64)>,
    calls: Vec<String>,
}

/// Optimizer answering the line search from a scripted list of verdicts;
/// an exhausted script passes.
pub struct FakeOptimizer {
    model: PathBuf,
    state: Mutex<OptimizerState>,
}

impl FakeOptimizer {
    pub fn new(model: impl Into<PathBuf>, verdicts: &[SearchStatus]) -> Self {
        Self {
            model: model.into(),
            state: Mutex::new(OptimizerState {
                iteration: 1,
                verdicts: verdicts.iter().copied().collect(),
                ..Default::default()
            }),
        }
    }

    pub fn misfits(&self) -> Vec<(MisfitKind, f64)> {
        self.state.lock().unwrap().misfits.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn record(&self, entry: &str) {
        self.state.lock().unwrap().calls.push(entry.to_string());
    }
}

impl Module for FakeOptimizer {
    fn name(&self) -> &str {
        "fake_optimizer"
    }
}

impl Optimizer for FakeOptimizer {
    fn iteration(&self) -> usize {
        self.state.lock().unwrap().iteration
    }

    fn start_at(&self, iteration: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.iteration = iteration;
        state.step = 0;
        state.calls.push(format!("start_at:{}", iteration));
        Ok(())
    }

    fn current_model(&self) -> Option<PathBuf> {
        None
    }

    fn step_count(&self) -> usize {
        self.state.lock().unwrap().step
    }

    fn record_misfit(&self, residuals: &[PathBuf], kind: MisfitKind) -> Result<f64> {
        let misfit = sum_residuals(residuals)?;
        self.state.lock().unwrap().misfits.push((kind, misfit));
        Ok(misfit)
    }

    fn compute_direction(&self, gradient: &Path) -> Result<()> {
        if !files::has_files(gradient)? {
            return Err(WorkflowError::step("empty gradient"));
        }
        self.record("compute_direction");
        Ok(())
    }

    fn initialize_search(&self) -> Result<()> {
        self.record("initialize_search");
        self.state.lock().unwrap().step = 0;
        Ok(())
    }

    fn trial_model(&self) -> Result<PathBuf> {
        Ok(self.model.clone())
    }

    fn update_search(&self) -> Result<SearchStatus> {
        let mut state = self.state.lock().unwrap();
        state.step += 1;
        let verdict = state.verdicts.pop_front().unwrap_or(SearchStatus::Pass);
        state.calls.push(format!("update_search:{:?}", verdict));
        Ok(verdict)
    }

    fn restart(&self) -> Result<()> {
        self.record("restart");
        Ok(())
    }

    fn finalize_search(&self) -> Result<()> {
        self.record("finalize_search");
        Ok(())
    }

    fn advance_iteration(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.iteration += 1;
        state.step = 0;
        state.calls.push("advance_iteration".to_string());
        Ok(())
    }
}

/// Serial dispatcher plus a fake solver over `sources`.
pub fn base_bundle(solver: Arc<FakeSolver>) -> CapabilityBundle {
    CapabilityBundle::new()
        .with_dispatcher(Arc::new(SerialDispatcher))
        .with_solver(solver)
}
