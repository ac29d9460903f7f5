//! The processor fleet lives on one dedicated worker thread.
//!
//! Processors are built from `Rc`-shared streams and never cross threads;
//! HTTP handlers talk to the worker over a channel and await a oneshot
//! reply, so the engine itself stays single-threaded per instance.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDateTime;
use crossbeam::channel::{Sender, unbounded};
use itertools::Itertools;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::graphs::builtin_configs;
use crate::params::Params;
use crate::processor::{CalcRow, Processor, ProcessorConfig};
use crate::trading::OrderRepo;

pub const HANDLE_CACHE_LIMIT: usize = 64;

/// Service-level failure, pre-mapped to the HTTP status taxonomy.
#[derive(Debug)]
pub enum ServiceError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl ServiceError {
    fn from_engine(error: Error) -> Self {
        if error.is_param() {
            ServiceError::BadRequest(error.to_string())
        } else {
            ServiceError::Internal(error.to_string())
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

pub enum Request {
    Descrs {
        name: String,
        reply: oneshot::Sender<ServiceResult<String>>,
    },
    DefaultParams {
        name: String,
        reply: oneshot::Sender<ServiceResult<String>>,
    },
    New {
        name: String,
        interval: i64,
        class_code: String,
        sec_code: String,
        reply: oneshot::Sender<ServiceResult<String>>,
    },
    SetParams {
        id: String,
        params: Params,
        reply: oneshot::Sender<ServiceResult<()>>,
    },
    CalcValues {
        id: String,
        price: Vec<Option<f64>>,
        volume: Vec<Option<f64>>,
        time: Vec<Option<NaiveDateTime>>,
        reply: oneshot::Sender<ServiceResult<Vec<Option<CalcRow>>>>,
    },
    Orders {
        reply: oneshot::Sender<ServiceResult<String>>,
    },
}

/// Bounded LRU of live processors.  Insertion beyond capacity evicts the
/// least recently used handle; every lookup refreshes recency.
pub struct HandleCache {
    limit: usize,
    items: HashMap<u64, Processor>,
    order: VecDeque<u64>,
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

impl HandleCache {
    pub fn new(limit: usize) -> Self {
        assert!(limit > 0, "invalid cache limit ({limit})");
        Self {
            limit,
            items: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, id: u64) {
        if let Some(at) = self.order.iter().position(|&o| o == id) {
            self.order.remove(at);
            self.order.push_back(id);
        }
    }

    pub fn add(&mut self, processor: Processor) -> u64 {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        self.items.insert(id, processor);
        self.order.push_back(id);
        if self.items.len() > self.limit {
            if let Some(evicted) = self.order.pop_front() {
                self.items.remove(&evicted);
                debug!("evicted processor handle {evicted:016x}");
            }
        }
        id
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Processor> {
        if self.items.contains_key(&id) {
            self.touch(id);
        }
        self.items.get_mut(&id)
    }

    /// Replaces an existing handle in place, keeping its id.
    pub fn replace(&mut self, id: u64, processor: Processor) -> bool {
        if !self.items.contains_key(&id) {
            return false;
        }
        self.items.insert(id, processor);
        self.touch(id);
        true
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cloneable front of the worker thread.
#[derive(Clone)]
pub struct ServiceHandle {
    sender: Sender<Request>,
}

impl ServiceHandle {
    pub async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<ServiceResult<T>>) -> Request,
    ) -> ServiceResult<T> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(request(reply))
            .map_err(|_| ServiceError::Internal("processor service is down".to_string()))?;
        response
            .await
            .map_err(|_| ServiceError::Internal("processor service dropped the request".to_string()))?
    }
}

/// Spawns the worker thread owning the config registry and handle cache.
pub fn spawn() -> ServiceHandle {
    let (sender, receiver) = unbounded::<Request>();
    std::thread::Builder::new()
        .name("tickflow-processors".to_string())
        .spawn(move || {
            let configs = builtin_configs();
            let mut cache = HandleCache::new(HANDLE_CACHE_LIMIT);
            while let Ok(request) = receiver.recv() {
                handle_request(&configs, &mut cache, request);
            }
        })
        .expect("spawn processor service thread");
    ServiceHandle { sender }
}

fn parse_id(id: &str) -> ServiceResult<u64> {
    u64::from_str_radix(id, 16).map_err(|_| ServiceError::NotFound(format!("invalid handle id ({id})")))
}

fn handle_request(
    configs: &std::collections::BTreeMap<String, Rc<ProcessorConfig>>,
    cache: &mut HandleCache,
    request: Request,
) {
    match request {
        Request::Descrs { name, reply } => {
            let result = configs
                .get(&name)
                .ok_or_else(|| ServiceError::NotFound(format!("unknown configuration ({name})")))
                .map(|config| {
                    config
                        .graph_configs()
                        .iter()
                        .map(|graph| {
                            format!("{};{};{}", graph.name, graph.title, graph.graph_type.code())
                        })
                        .join("\n")
                });
            let _ = reply.send(result);
        }
        Request::DefaultParams { name, reply } => {
            let result = configs
                .get(&name)
                .ok_or_else(|| ServiceError::NotFound(format!("unknown configuration ({name})")))
                .map(|config| {
                    config
                        .default_params()
                        .iter()
                        .map(|(key, value)| match value.as_str() {
                            Some(s) => format!("{key}={s}"),
                            None => format!("{key}={value}"),
                        })
                        .join("\n")
                });
            let _ = reply.send(result);
        }
        Request::New {
            name,
            interval,
            class_code,
            sec_code,
            reply,
        } => {
            let result = configs
                .get(&name)
                .ok_or_else(|| ServiceError::NotFound(format!("unknown configuration ({name})")))
                .and_then(|config| {
                    Processor::new(config.clone(), interval, &class_code, &sec_code)
                        .map_err(ServiceError::from_engine)
                })
                .map(|processor| format!("{:016x}", cache.add(processor)));
            let _ = reply.send(result);
        }
        Request::SetParams { id, params, reply } => {
            let result = parse_id(&id).and_then(|id| {
                let processor = cache
                    .get_mut(id)
                    .ok_or_else(|| ServiceError::NotFound(format!("unknown handle ({id:016x})")))?;
                let replacement = processor
                    .copy_with_params(params)
                    .map_err(ServiceError::from_engine)?;
                cache.replace(id, replacement);
                Ok(())
            });
            let _ = reply.send(result);
        }
        Request::CalcValues {
            id,
            price,
            volume,
            time,
            reply,
        } => {
            let result = parse_id(&id).and_then(|id| {
                let processor = cache
                    .get_mut(id)
                    .ok_or_else(|| ServiceError::NotFound(format!("unknown handle ({id:016x})")))?;
                processor
                    .calc_values(price, volume, time)
                    .map_err(ServiceError::from_engine)
            });
            let _ = reply.send(result);
        }
        Request::Orders { reply } => {
            let blocks = OrderRepo::take_new()
                .iter()
                .map(|order| order.to_kv())
                .join("\n\n");
            let _ = reply.send(Ok(blocks));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::sandbox_config;

    fn processor() -> Processor {
        Processor::new(Rc::new(sandbox_config()), 1, "TQBR", "TEST").unwrap()
    }

    #[test]
    fn cache_evicts_least_recently_used() {
        let mut cache = HandleCache::new(2);
        let a = cache.add(processor());
        let b = cache.add(processor());
        // refresh a, so b is the eviction victim
        assert!(cache.get_mut(a).is_some());
        let c = cache.add(processor());
        assert_eq!(cache.len(), 2);
        assert!(cache.get_mut(b).is_none());
        assert!(cache.get_mut(a).is_some());
        assert!(cache.get_mut(c).is_some());
    }

    #[test]
    fn cache_replace_keeps_id() {
        let mut cache = HandleCache::new(2);
        let id = cache.add(processor());
        assert!(cache.replace(id, processor()));
        assert!(cache.get_mut(id).is_some());
        assert!(!cache.replace(9999, processor()));
    }
}
