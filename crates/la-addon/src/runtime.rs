use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use la_grammar::{Grammar, GrammarState};
use la_sampler::grammar as grammar_stage;
use la_sampler::{SampleOutput, SampleRequest, Sampler, SamplerConfig, SharedGrammarState};
use log::{debug, info};

use crate::arena::{Arena, Handle};
use crate::batch::Batch;
use crate::config::RuntimeConfig;
use crate::engine::{ContextBackend, EngineVocab, ModelBackend};
use crate::error::{AddonError, ResourceKind, Result};
use crate::process::ProcessContext;
use crate::token_attributes::TokenAttributes;
use crate::worker::{Pending, WorkerPool};

pub type ModelHandle = Handle<ModelEntry>;
pub type ContextHandle = Handle<ContextEntry>;
pub type SamplerHandle = Handle<SamplerEntry>;
pub type GrammarHandle = Handle<GrammarEntry>;
pub type GrammarStateHandle = Handle<GrammarStateEntry>;

type SharedContext = Arc<Mutex<Box<dyn ContextBackend>>>;

#[derive(Debug)]
pub struct ModelEntry {
    backend: Arc<dyn ModelBackend>,
    dependents: usize,
}

#[derive(Debug)]
pub struct ContextEntry {
    model: ModelHandle,
    backend: SharedContext,
}

#[derive(Debug)]
pub struct SamplerEntry {
    model: ModelHandle,
    sampler: Arc<Mutex<Sampler>>,
}

#[derive(Debug)]
pub struct GrammarEntry {
    grammar: Arc<Grammar>,
}

#[derive(Debug)]
pub struct GrammarStateEntry {
    model: ModelHandle,
    state: SharedGrammarState,
}

#[derive(Debug, Default)]
struct Resources {
    models: Arena<ModelEntry>,
    contexts: Arena<ContextEntry>,
    samplers: Arena<SamplerEntry>,
    grammars: Arena<GrammarEntry>,
    grammar_states: Arena<GrammarStateEntry>,
}

impl Resources {
    fn model(&self, handle: ModelHandle) -> Result<&ModelEntry> {
        self.models
            .get(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Model))
    }

    fn context(&self, handle: ContextHandle) -> Result<&ContextEntry> {
        self.contexts
            .get(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Context))
    }

    fn sampler(&self, handle: SamplerHandle) -> Result<&SamplerEntry> {
        self.samplers
            .get(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Sampler))
    }

    fn grammar(&self, handle: GrammarHandle) -> Result<&GrammarEntry> {
        self.grammars
            .get(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Grammar))
    }

    fn grammar_state(&self, handle: GrammarStateHandle) -> Result<&GrammarStateEntry> {
        self.grammar_states
            .get(handle)
            .ok_or(AddonError::Disposed(ResourceKind::GrammarState))
    }

    fn retain_model(&mut self, handle: ModelHandle) -> Result<Arc<dyn ModelBackend>> {
        let entry = self
            .models
            .get_mut(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Model))?;
        entry.dependents += 1;
        Ok(Arc::clone(&entry.backend))
    }

    fn release_model(&mut self, handle: ModelHandle) {
        if let Some(entry) = self.models.get_mut(handle) {
            entry.dependents = entry.dependents.saturating_sub(1);
        }
    }
}

fn lock_resource<T: ?Sized>(mutex: &Mutex<T>, kind: ResourceKind) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AddonError::Panicked(format!("a previous operation on this {} panicked", kind)))
}

fn check_token(model: &dyn ModelBackend, token: u32) -> Result<()> {
    if token as usize >= model.vocab_size() {
        return Err(AddonError::InvalidArgument(format!(
            "token {} is out of range for a vocabulary of {}",
            token,
            model.vocab_size()
        )));
    }
    Ok(())
}

/// Owns every native resource handed out to the host, the worker pool that
/// runs decode and sample operations, and the process-wide logging setup.
///
/// Handle-taking methods fail with [`AddonError::Disposed`] before anything
/// is queued when a handle no longer resolves. A queued operation holds its
/// own references, so disposing a handle does not cut it short.
#[derive(Debug)]
pub struct Runtime {
    process: ProcessContext,
    config: RuntimeConfig,
    resources: Mutex<Resources>,
    workers: WorkerPool,
}

impl Runtime {
    /// Start the worker pool and logging state described by `config`.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let process = ProcessContext::init(config.log_level);
        let workers = WorkerPool::new(config.worker_threads)?;
        info!("runtime started with {} worker thread(s)", workers.size());
        Ok(Self {
            process,
            config,
            resources: Mutex::new(Resources::default()),
            workers,
        })
    }

    pub fn process(&self) -> &ProcessContext {
        &self.process
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn resources(&self) -> MutexGuard<'_, Resources> {
        // arena updates are single statements, so the data is consistent
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- models ----

    /// Take ownership of an engine model and hand out its handle.
    pub fn register_model(&self, backend: Arc<dyn ModelBackend>) -> ModelHandle {
        let n_vocab = backend.vocab_size();
        let handle = self.resources().models.insert(ModelEntry {
            backend,
            dependents: 0,
        });
        debug!("registered model {:?} ({} tokens)", handle, n_vocab);
        handle
    }

    /// Fails while contexts, samplers or grammar states still use the model.
    pub fn dispose_model(&self, handle: ModelHandle) -> Result<()> {
        let mut resources = self.resources();
        let dependents = resources.model(handle)?.dependents;
        if dependents > 0 {
            return Err(AddonError::ResourceInUse {
                kind: ResourceKind::Model,
                dependents,
            });
        }
        resources.models.remove(handle);
        debug!("disposed model {:?}", handle);
        Ok(())
    }

    pub fn model_vocab_size(&self, handle: ModelHandle) -> Result<usize> {
        Ok(self.resources().model(handle)?.backend.vocab_size())
    }

    /// Attribute bits of `token`, checked against the vocabulary.
    pub fn token_attributes(&self, handle: ModelHandle, token: u32) -> Result<TokenAttributes> {
        let backend = Arc::clone(&self.resources().model(handle)?.backend);
        check_token(backend.as_ref(), token)?;
        Ok(backend.token_attributes(token))
    }

    pub fn is_end_of_generation(&self, handle: ModelHandle, token: u32) -> Result<bool> {
        let backend = Arc::clone(&self.resources().model(handle)?.backend);
        Ok(backend.is_end_of_generation(token))
    }

    // ---- contexts ----

    /// Attach an engine context to `model`. The model stays alive until
    /// the context is disposed.
    pub fn create_context(
        &self,
        model: ModelHandle,
        backend: Box<dyn ContextBackend>,
    ) -> Result<ContextHandle> {
        let mut resources = self.resources();
        resources.retain_model(model)?;
        let handle = resources.contexts.insert(ContextEntry {
            model,
            backend: Arc::new(Mutex::new(backend)),
        });
        debug!("created context {:?} on model {:?}", handle, model);
        Ok(handle)
    }

    pub fn dispose_context(&self, handle: ContextHandle) -> Result<()> {
        let mut resources = self.resources();
        let entry = resources
            .contexts
            .remove(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Context))?;
        resources.release_model(entry.model);
        debug!("disposed context {:?}", handle);
        Ok(())
    }

    fn context_backend(&self, handle: ContextHandle) -> Result<SharedContext> {
        Ok(Arc::clone(&self.resources().context(handle)?.backend))
    }

    /// Queue a decode of `batch` on the context.
    pub fn decode(&self, context: ContextHandle, batch: Batch) -> Result<Pending<()>> {
        let backend = self.context_backend(context)?;
        self.workers
            .submit(move || run_decode(&backend, &batch))
    }

    /// Like [`Runtime::decode`], reporting through `done` on the worker.
    pub fn decode_then(
        &self,
        context: ContextHandle,
        batch: Batch,
        done: impl FnOnce(Result<()>) + Send + 'static,
    ) -> Result<()> {
        let backend = self.context_backend(context)?;
        self.workers
            .submit_then(move || run_decode(&backend, &batch), done)
    }

    // ---- grammars ----

    /// Compile a grammar. `root` names the start rule, `root` by default.
    pub fn create_grammar(&self, text: &str, root: Option<&str>) -> Result<GrammarHandle> {
        let grammar = Grammar::parse_with_root(text, root.unwrap_or(Grammar::DEFAULT_ROOT))?;
        let handle = self.resources().grammars.insert(GrammarEntry {
            grammar: Arc::new(grammar),
        });
        debug!("created grammar {:?}", handle);
        Ok(handle)
    }

    /// Whether the grammar accepts all of `text` from its start rule.
    pub fn grammar_is_text_compatible(&self, handle: GrammarHandle, text: &str) -> Result<bool> {
        let grammar = Arc::clone(&self.resources().grammar(handle)?.grammar);
        Ok(grammar.is_text_compatible(text))
    }

    /// Evaluation states created from the grammar keep using it.
    pub fn dispose_grammar(&self, handle: GrammarHandle) -> Result<()> {
        self.resources()
            .grammars
            .remove(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Grammar))?;
        debug!("disposed grammar {:?}", handle);
        Ok(())
    }

    // ---- grammar evaluation states ----

    /// A fresh evaluation state of `grammar`, tied to `model`.
    pub fn create_grammar_state(
        &self,
        model: ModelHandle,
        grammar: GrammarHandle,
    ) -> Result<GrammarStateHandle> {
        let mut resources = self.resources();
        let grammar = Arc::clone(&resources.grammar(grammar)?.grammar);
        resources.retain_model(model)?;
        let handle = resources.grammar_states.insert(GrammarStateEntry {
            model,
            state: grammar_stage::shared(GrammarState::new(grammar)),
        });
        Ok(handle)
    }

    /// A new state at the same parse position, sharing the grammar.
    pub fn clone_grammar_state(&self, handle: GrammarStateHandle) -> Result<GrammarStateHandle> {
        let mut resources = self.resources();
        let entry = resources.grammar_state(handle)?;
        let model = entry.model;
        let state = grammar_stage::lock(&entry.state).clone();
        resources.retain_model(model)?;
        Ok(resources.grammar_states.insert(GrammarStateEntry {
            model,
            state: grammar_stage::shared(state),
        }))
    }

    fn grammar_state_parts(
        &self,
        handle: GrammarStateHandle,
    ) -> Result<(Arc<dyn ModelBackend>, SharedGrammarState)> {
        let resources = self.resources();
        let entry = resources.grammar_state(handle)?;
        let model = Arc::clone(&resources.model(entry.model)?.backend);
        Ok((model, Arc::clone(&entry.state)))
    }

    /// Whether `token` may come next. Does not advance the state.
    pub fn grammar_state_can_be_next_token(
        &self,
        handle: GrammarStateHandle,
        token: u32,
    ) -> Result<bool> {
        let (model, state) = self.grammar_state_parts(handle)?;
        check_token(model.as_ref(), token)?;
        let state = grammar_stage::lock(&state);
        Ok(grammar_stage::can_be_next_token(
            &state,
            token,
            &EngineVocab(model.as_ref()),
        ))
    }

    /// Advance the state by `token`. End-of-generation tokens are ignored.
    pub fn grammar_state_accept_token(&self, handle: GrammarStateHandle, token: u32) -> Result<()> {
        let (model, state) = self.grammar_state_parts(handle)?;
        check_token(model.as_ref(), token)?;
        let mut state = grammar_stage::lock(&state);
        grammar_stage::accept_token(&mut state, token, &EngineVocab(model.as_ref()))?;
        Ok(())
    }

    pub fn dispose_grammar_state(&self, handle: GrammarStateHandle) -> Result<()> {
        let mut resources = self.resources();
        let entry = resources
            .grammar_states
            .remove(handle)
            .ok_or(AddonError::Disposed(ResourceKind::GrammarState))?;
        resources.release_model(entry.model);
        debug!("disposed grammar evaluation state {:?}", handle);
        Ok(())
    }

    // ---- samplers ----

    /// A sampler for `model`, seeded from `default_seed` when configured.
    pub fn create_sampler(&self, model: ModelHandle) -> Result<SamplerHandle> {
        let mut resources = self.resources();
        let backend = resources.retain_model(model)?;
        let mut sampler = Sampler::new(backend.vocab_size());
        if let Some(seed) = self.config.default_seed {
            let config = SamplerConfig {
                seed: Some(seed),
                ..Default::default()
            };
            if let Err(e) = sampler.apply_config(&config, None) {
                resources.release_model(model);
                return Err(e.into());
            }
        }
        let handle = resources.samplers.insert(SamplerEntry {
            model,
            sampler: Arc::new(Mutex::new(sampler)),
        });
        debug!("created sampler {:?} on model {:?}", handle, model);
        Ok(handle)
    }

    /// Apply an options bag. A `grammarEvaluationState` id must name a live
    /// state created for the same model.
    pub fn apply_sampler_config(&self, handle: SamplerHandle, config: &SamplerConfig) -> Result<()> {
        let (sampler, grammar) = {
            let resources = self.resources();
            let entry = resources.sampler(handle)?;
            let grammar = match config.grammar_evaluation_state {
                Some(raw) => {
                    let state = resources.grammar_state(Handle::from_raw(raw))?;
                    if state.model != entry.model {
                        return Err(AddonError::InvalidConfiguration(
                            "grammar evaluation state belongs to a different model".to_string(),
                        ));
                    }
                    Some(Arc::clone(&state.state))
                }
                None => None,
            };
            (Arc::clone(&entry.sampler), grammar)
        };
        lock_resource(&sampler, ResourceKind::Sampler)?.apply_config(config, grammar)?;
        Ok(())
    }

    /// Same as [`Runtime::apply_sampler_config`] with the options bag
    /// given as JSON.
    pub fn apply_sampler_config_json(&self, handle: SamplerHandle, json: &str) -> Result<()> {
        let config: SamplerConfig = serde_json::from_str(json)?;
        self.apply_sampler_config(handle, &config)
    }

    fn sample_job(
        &self,
        context: ContextHandle,
        sampler: SamplerHandle,
        logit_index: i32,
        request: SampleRequest,
    ) -> Result<impl FnOnce() -> Result<SampleOutput> + Send + 'static> {
        let (model, backend, sampler) = {
            let resources = self.resources();
            let context_entry = resources.context(context)?;
            let sampler_entry = resources.sampler(sampler)?;
            if context_entry.model != sampler_entry.model {
                return Err(AddonError::InvalidArgument(
                    "context and sampler belong to different models".to_string(),
                ));
            }
            (
                Arc::clone(&resources.model(sampler_entry.model)?.backend),
                Arc::clone(&context_entry.backend),
                Arc::clone(&sampler_entry.sampler),
            )
        };

        Ok(move || {
            let backend = lock_resource(&backend, ResourceKind::Context)?;
            let logits = backend.logits_ith(logit_index);
            let mut sampler = lock_resource(&sampler, ResourceKind::Sampler)?;
            Ok(sampler.sample(logits, &EngineVocab(model.as_ref()), request)?)
        })
    }

    /// Queue sampling of the `logit_index`-th output of the context's last
    /// decode.
    pub fn sample(
        &self,
        context: ContextHandle,
        sampler: SamplerHandle,
        logit_index: i32,
        request: SampleRequest,
    ) -> Result<Pending<SampleOutput>> {
        let job = self.sample_job(context, sampler, logit_index, request)?;
        self.workers.submit(job)
    }

    /// Like [`Runtime::sample`], reporting through `done` on the worker.
    pub fn sample_then(
        &self,
        context: ContextHandle,
        sampler: SamplerHandle,
        logit_index: i32,
        request: SampleRequest,
        done: impl FnOnce(Result<SampleOutput>) + Send + 'static,
    ) -> Result<()> {
        let job = self.sample_job(context, sampler, logit_index, request)?;
        self.workers.submit_then(job, done)
    }

    /// Feed a token the sampler did not choose itself (for example prompt
    /// tokens) into its history and grammar state.
    pub fn accept_sampler_token(&self, handle: SamplerHandle, token: u32) -> Result<()> {
        let (model, sampler) = {
            let resources = self.resources();
            let entry = resources.sampler(handle)?;
            (
                Arc::clone(&resources.model(entry.model)?.backend),
                Arc::clone(&entry.sampler),
            )
        };
        let mut sampler = lock_resource(&sampler, ResourceKind::Sampler)?;
        sampler.accept_token(token, &EngineVocab(model.as_ref()))?;
        Ok(())
    }

    pub fn dispose_sampler(&self, handle: SamplerHandle) -> Result<()> {
        let mut resources = self.resources();
        let entry = resources
            .samplers
            .remove(handle)
            .ok_or(AddonError::Disposed(ResourceKind::Sampler))?;
        resources.release_model(entry.model);
        debug!("disposed sampler {:?}", handle);
        Ok(())
    }

    /// Dispose everything still alive (samplers, grammar states, grammars,
    /// contexts, then models), join the workers after queued work drains and
    /// stop routing `log` records to this runtime's host callback.
    pub fn shutdown(&self) {
        {
            let mut resources = self.resources();
            for handle in resources.samplers.handles() {
                if let Some(entry) = resources.samplers.remove(handle) {
                    resources.release_model(entry.model);
                }
            }
            for handle in resources.grammar_states.handles() {
                if let Some(entry) = resources.grammar_states.remove(handle) {
                    resources.release_model(entry.model);
                }
            }
            for handle in resources.grammars.handles() {
                resources.grammars.remove(handle);
            }
            for handle in resources.contexts.handles() {
                if let Some(entry) = resources.contexts.remove(handle) {
                    resources.release_model(entry.model);
                }
            }
            for handle in resources.models.handles() {
                resources.models.remove(handle);
            }
        }
        self.workers.shutdown();
        self.process.detach_logger();
        debug!("runtime shut down");
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_decode(backend: &SharedContext, batch: &Batch) -> Result<()> {
    if batch.is_empty() {
        return Err(AddonError::InvalidArgument("cannot decode an empty batch".to_string()));
    }
    let mut backend = lock_resource(backend, ResourceKind::Context)?;
    backend.decode(batch).into_result()
}
