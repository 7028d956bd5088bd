//! Capability traits implemented by user code and plugged into the generic
//! operators.
//!
//! Async closures implement the matching trait directly; wrap a plain
//! closure in [`SyncFn`] to use it where an async one is expected.

use std::future::Future;

use async_trait::async_trait;
use awel_task::OutputStream;
use serde_json::Value;

use crate::error::OperatorError;

#[async_trait]
pub trait MapFunction: Send + Sync {
  async fn map(&self, input: Value) -> Result<Value, OperatorError>;
}

#[async_trait]
pub trait ReduceFunction: Send + Sync {
  async fn reduce(&self, acc: Value, item: Value) -> Result<Value, OperatorError>;
}

#[async_trait]
pub trait JoinFunction: Send + Sync {
  /// Parent values in input-pin order; empty and skipped parents are `None`.
  async fn join(&self, inputs: Vec<Option<Value>>) -> Result<Value, OperatorError>;
}

#[async_trait]
pub trait BranchPredicate: Send + Sync {
  async fn check(&self, input: Value) -> Result<bool, OperatorError>;
}

#[async_trait]
pub trait UnstreamifyFunction: Send + Sync {
  async fn unstreamify(&self, items: Vec<Value>) -> Result<Value, OperatorError>;
}

pub trait StreamifyFunction: Send + Sync {
  fn streamify(&self, input: Value) -> OutputStream<Value>;
}

pub trait TransformStreamFunction: Send + Sync {
  fn transform(&self, input: OutputStream<Value>) -> OutputStream<Value>;
}

#[async_trait]
impl<F, Fut> MapFunction for F
where
  F: Fn(Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, OperatorError>> + Send,
{
  async fn map(&self, input: Value) -> Result<Value, OperatorError> {
    self(input).await
  }
}

#[async_trait]
impl<F, Fut> ReduceFunction for F
where
  F: Fn(Value, Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, OperatorError>> + Send,
{
  async fn reduce(&self, acc: Value, item: Value) -> Result<Value, OperatorError> {
    self(acc, item).await
  }
}

#[async_trait]
impl<F, Fut> JoinFunction for F
where
  F: Fn(Vec<Option<Value>>) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, OperatorError>> + Send,
{
  async fn join(&self, inputs: Vec<Option<Value>>) -> Result<Value, OperatorError> {
    self(inputs).await
  }
}

#[async_trait]
impl<F, Fut> BranchPredicate for F
where
  F: Fn(Value) -> Fut + Send + Sync,
  Fut: Future<Output = Result<bool, OperatorError>> + Send,
{
  async fn check(&self, input: Value) -> Result<bool, OperatorError> {
    self(input).await
  }
}

#[async_trait]
impl<F, Fut> UnstreamifyFunction for F
where
  F: Fn(Vec<Value>) -> Fut + Send + Sync,
  Fut: Future<Output = Result<Value, OperatorError>> + Send,
{
  async fn unstreamify(&self, items: Vec<Value>) -> Result<Value, OperatorError> {
    self(items).await
  }
}

impl<F> StreamifyFunction for F
where
  F: Fn(Value) -> OutputStream<Value> + Send + Sync,
{
  fn streamify(&self, input: Value) -> OutputStream<Value> {
    self(input)
  }
}

impl<F> TransformStreamFunction for F
where
  F: Fn(OutputStream<Value>) -> OutputStream<Value> + Send + Sync,
{
  fn transform(&self, input: OutputStream<Value>) -> OutputStream<Value> {
    self(input)
  }
}

/// Adapter for synchronous closures.
pub struct SyncFn<F>(pub F);

#[async_trait]
impl<F> MapFunction for SyncFn<F>
where
  F: Fn(Value) -> Result<Value, OperatorError> + Send + Sync,
{
  async fn map(&self, input: Value) -> Result<Value, OperatorError> {
    (self.0)(input)
  }
}

#[async_trait]
impl<F> ReduceFunction for SyncFn<F>
where
  F: Fn(Value, Value) -> Result<Value, OperatorError> + Send + Sync,
{
  async fn reduce(&self, acc: Value, item: Value) -> Result<Value, OperatorError> {
    (self.0)(acc, item)
  }
}

#[async_trait]
impl<F> JoinFunction for SyncFn<F>
where
  F: Fn(Vec<Option<Value>>) -> Result<Value, OperatorError> + Send + Sync,
{
  async fn join(&self, inputs: Vec<Option<Value>>) -> Result<Value, OperatorError> {
    (self.0)(inputs)
  }
}

#[async_trait]
impl<F> BranchPredicate for SyncFn<F>
where
  F: Fn(&Value) -> bool + Send + Sync,
{
  async fn check(&self, input: Value) -> Result<bool, OperatorError> {
    Ok((self.0)(&input))
  }
}

#[async_trait]
impl<F> UnstreamifyFunction for SyncFn<F>
where
  F: Fn(Vec<Value>) -> Result<Value, OperatorError> + Send + Sync,
{
  async fn unstreamify(&self, items: Vec<Value>) -> Result<Value, OperatorError> {
    (self.0)(items)
  }
}
