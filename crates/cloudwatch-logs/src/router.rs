// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Owns the destinations, one per target, created on first use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::ClientFactory;
use crate::destination::Destination;
use crate::errors::OutputError;
use crate::pusher::{PusherConfig, StatsSnapshot};
use crate::target::Target;

pub struct Router {
    destinations: RwLock<HashMap<Target, Arc<Destination>>>,
    factory: Arc<dyn ClientFactory>,
    config: PusherConfig,
    cancel: CancellationToken,
}

impl Router {
    pub fn new(factory: Arc<dyn ClientFactory>, config: PusherConfig) -> Self {
        Router {
            destinations: RwLock::new(HashMap::new()),
            factory,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Returns the destination of `target`, creating it and spawning its
    /// pusher on first use. Must be called from within a tokio runtime.
    pub fn resolve(&self, target: &Target) -> Result<Arc<Destination>, OutputError> {
        if self.cancel.is_cancelled() {
            return Err(OutputError::OutputStopped);
        }

        {
            let destinations = match self.destinations.read() {
                Ok(destinations) => destinations,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(destination) = destinations.get(target) {
                return Ok(Arc::clone(destination));
            }
        }

        let mut destinations = match self.destinations.write() {
            Ok(destinations) => destinations,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Another caller may have won the race for the write lock.
        if let Some(destination) = destinations.get(target) {
            return Ok(Arc::clone(destination));
        }
        if self.cancel.is_cancelled() {
            return Err(OutputError::OutputStopped);
        }

        debug!("Creating destination {}", target);
        let client = self.factory.build(target);
        let destination = Arc::new(Destination::new(
            target.clone(),
            client,
            &self.config,
            self.cancel.child_token(),
        ));
        destinations.insert(target.clone(), Arc::clone(&destination));
        Ok(destination)
    }

    /// Looks up a destination without creating it.
    pub fn get(&self, target: &Target) -> Option<Arc<Destination>> {
        let destinations = match self.destinations.read() {
            Ok(destinations) => destinations,
            Err(poisoned) => poisoned.into_inner(),
        };
        destinations.get(target).cloned()
    }

    pub fn len(&self) -> usize {
        match self.destinations.read() {
            Ok(destinations) => destinations.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> Vec<(Target, StatsSnapshot)> {
        let destinations = self.snapshot();
        let mut stats: Vec<_> = destinations
            .iter()
            .map(|d| (d.target().clone(), d.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        stats
    }

    /// Stops every destination and waits for their final flushes. No
    /// destination can be created afterwards.
    pub async fn close(&self) {
        self.cancel.cancel();
        let destinations = self.snapshot();
        info!("Closing {} destinations", destinations.len());
        for destination in destinations {
            destination.stop().await;
        }
    }

    fn snapshot(&self) -> Vec<Arc<Destination>> {
        let destinations = match self.destinations.read() {
            Ok(destinations) => destinations,
            Err(poisoned) => poisoned.into_inner(),
        };
        destinations.values().cloned().collect()
    }
}
