use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use awel_cache::{CacheStorage, CachedOutput};
use awel_dag::operator::{InputSource, IterableInputSource, StreamInputSource};
use awel_dag::{
  Dag, DagContext, Operator, OperatorError, OperatorKind, RunnerError, TriggerOperator, WorkflowRunner,
};
use awel_task::{OutputStream, TaskContext, TaskOutput};
use futures::TryStreamExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::error::TriggerError;
use crate::http::single_leaf;

pub type CacheKeyFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// One input item paired with its run's outcome.
pub type IteratorResult = (Value, Result<TaskOutput<Value>, TriggerError>);

/// Result cache for an [`IteratorTrigger`].
#[derive(Clone)]
pub struct IteratorCache {
  storage: Arc<dyn CacheStorage>,
  key_fn: CacheKeyFn,
  ttl: Option<Duration>,
  enabled: bool,
}

impl IteratorCache {
  /// Keys default to the item's JSON text, with no expiry.
  pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      storage,
      key_fn: Arc::new(|item: &Value| item.to_string()),
      ttl: None,
      enabled: true,
    }
  }

  pub fn with_key_fn(mut self, key_fn: impl Fn(&Value) -> String + Send + Sync + 'static) -> Self {
    self.key_fn = Arc::new(key_fn);
    self
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }

  pub fn enabled(mut self, enabled: bool) -> Self {
    self.enabled = enabled;
    self
  }
}

/// Runs a DAG once per item of its source.
pub struct IteratorTrigger {
  source: Arc<dyn InputSource>,
  parallel_num: usize,
  streaming_call: bool,
  max_retries: usize,
  retry_delay: Duration,
  timeout: Option<Duration>,
  cache: Option<IteratorCache>,
}

impl IteratorTrigger {
  pub fn new(source: Arc<dyn InputSource>) -> Self {
    Self {
      source,
      parallel_num: 1,
      streaming_call: false,
      max_retries: 0,
      retry_delay: Duration::from_secs(1),
      timeout: None,
      cache: None,
    }
  }

  pub fn from_items(items: Vec<Value>) -> Self {
    Self::new(Arc::new(IterableInputSource(items)))
  }

  pub fn from_stream(stream: OutputStream<Value>) -> Self {
    Self::new(Arc::new(StreamInputSource::new(stream)))
  }

  pub fn with_parallel_num(mut self, parallel_num: usize) -> Self {
    self.parallel_num = parallel_num.max(1);
    self
  }

  pub fn with_streaming_call(mut self, streaming_call: bool) -> Self {
    self.streaming_call = streaming_call;
    self
  }

  pub fn with_retries(mut self, max_retries: usize, retry_delay: Duration) -> Self {
    self.max_retries = max_retries;
    self.retry_delay = retry_delay;
    self
  }

  /// Per-item time limit. Only applies to non-streaming calls.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_cache(mut self, cache: IteratorCache) -> Self {
    self.cache = Some(cache);
    self
  }

  async fn items(&self) -> Result<Vec<Value>, TriggerError> {
    let task = TaskContext::new("iterator_source");
    Ok(match self.source.read(&task).await? {
      TaskOutput::Value(Value::Array(items)) => items,
      TaskOutput::Value(item) => vec![item],
      output @ TaskOutput::Stream(_) => output
        .to_stream()
        .map_err(RunnerError::from)?
        .try_collect()
        .await
        .map_err(RunnerError::from)?,
      TaskOutput::Empty | TaskOutput::Skip => Vec::new(),
    })
  }

  /// Run `dag` from the trigger node `trigger_id` once per source item.
  ///
  /// At most `parallel_num` runs are in flight. Results keep input order;
  /// a failed item does not stop the others.
  #[instrument(
    name = "iterator_trigger",
    skip(self, dag, runner),
    fields(
      dag_id = %dag.dag_id(),
      trigger_id = %trigger_id,
    )
  )]
  pub async fn trigger(
    &self,
    dag: &Arc<Dag>,
    trigger_id: &str,
    runner: &WorkflowRunner,
  ) -> Result<Vec<IteratorResult>, TriggerError> {
    let leaf_id = single_leaf(dag, trigger_id)?;
    let items = self.items().await?;
    info!(items = items.len(), parallel = self.parallel_num, "iterator_trigger_started");

    let semaphore = Semaphore::new(self.parallel_num);
    let runs = items.into_iter().map(|item| {
      let semaphore = &semaphore;
      let leaf_id = leaf_id.as_str();
      async move {
        let _permit = semaphore.acquire().await.ok();
        let result = self.run_item(dag, leaf_id, runner, &item).await;
        (item, result)
      }
    });
    let results = join_all(runs).await;

    if let Some(cache) = self.active_cache()
      && let Err(e) = cache.storage.commit().await
    {
      warn!(error = %e, "cache_commit_failed");
    }
    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    info!(items = results.len(), failed, "iterator_trigger_completed");
    Ok(results)
  }

  fn active_cache(&self) -> Option<&IteratorCache> {
    self.cache.as_ref().filter(|cache| cache.enabled)
  }

  async fn run_item(
    &self,
    dag: &Arc<Dag>,
    leaf_id: &str,
    runner: &WorkflowRunner,
    item: &Value,
  ) -> Result<TaskOutput<Value>, TriggerError> {
    let cache = self.active_cache().map(|cache| (cache, (cache.key_fn)(item)));

    if let Some((cache, key)) = &cache {
      match cache.storage.get(key).await {
        Ok(Some(hit)) => {
          debug!(key = %key, "cache_hit");
          return Ok(match hit {
            CachedOutput::Value(value) => TaskOutput::Value(value),
            CachedOutput::Stream(items) => TaskOutput::from_items(items),
          });
        }
        Ok(None) => {}
        Err(e) => warn!(key = %key, error = %e, "cache_read_failed"),
      }
    }

    let output = self.run_with_retry(dag, leaf_id, runner, item).await?;
    let Some((cache, key)) = cache else {
      return Ok(output);
    };

    let (output, cached) = match output {
      TaskOutput::Value(value) => (TaskOutput::Value(value.clone()), CachedOutput::Value(value)),
      output @ TaskOutput::Stream(_) => {
        let items: Vec<Value> = output
          .to_stream()
          .map_err(RunnerError::from)?
          .try_collect()
          .await
          .map_err(RunnerError::from)?;
        (TaskOutput::from_items(items.clone()), CachedOutput::Stream(items))
      }
      other => return Ok(other),
    };
    if let Err(e) = cache.storage.set(&key, cached, cache.ttl).await {
      warn!(key = %key, error = %e, "cache_write_failed");
    }
    Ok(output)
  }

  async fn run_with_retry(
    &self,
    dag: &Arc<Dag>,
    leaf_id: &str,
    runner: &WorkflowRunner,
    item: &Value,
  ) -> Result<TaskOutput<Value>, TriggerError> {
    let mut attempt = 0;
    loop {
      attempt += 1;
      match self.run_once(dag, leaf_id, runner, item).await {
        Ok(output) => return Ok(output),
        Err(e) if attempt <= self.max_retries => {
          warn!(attempt, error = %e, "iterator_task_retry");
          tokio::time::sleep(self.retry_delay).await;
        }
        Err(e) if self.max_retries == 0 => return Err(e),
        Err(e) => {
          return Err(TriggerError::RetryExceeded {
            attempts: attempt,
            source: Box::new(e),
          });
        }
      }
    }
  }

  async fn run_once(
    &self,
    dag: &Arc<Dag>,
    leaf_id: &str,
    runner: &WorkflowRunner,
    item: &Value,
  ) -> Result<TaskOutput<Value>, TriggerError> {
    if self.streaming_call {
      let stream = runner.call_stream(dag, leaf_id, Some(item.clone())).await?;
      return Ok(TaskOutput::from_stream(stream));
    }
    let call = runner.call(dag, leaf_id, Some(item.clone()));
    match self.timeout {
      Some(timeout) => tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| TriggerError::Timeout { timeout })?
        .map_err(TriggerError::from),
      None => Ok(call.await?),
    }
  }
}

#[async_trait]
impl Operator for IteratorTrigger {
  fn kind(&self) -> OperatorKind {
    OperatorKind::Trigger
  }

  async fn run(&self, task: &mut TaskContext<Value>, dag_ctx: &DagContext) -> Result<(), OperatorError> {
    TriggerOperator::new().run(task, dag_ctx).await
  }
}

/// Run the one iterator trigger node of `dag`.
pub async fn trigger_dag(dag: &Arc<Dag>, runner: &WorkflowRunner) -> Result<Vec<IteratorResult>, TriggerError> {
  let nodes: Vec<_> = dag
    .trigger_nodes()
    .into_iter()
    .filter_map(|node| {
      node
        .operator()
        .downcast_ref::<IteratorTrigger>()
        .map(|trigger| (node.node_id(), trigger))
    })
    .collect();
  match nodes.as_slice() {
    [(node_id, trigger)] => trigger.trigger(dag, node_id, runner).await,
    other => Err(TriggerError::invalid_config(format!(
      "DAG '{}' has {} iterator triggers, expected one",
      dag.dag_id(),
      other.len()
    ))),
  }
}
