//! Domain gate: politeness and lease transitions of domains
//!
//! Every lease is taken with a conditional update in storage, so two callers
//! racing for the same origin can never both win. Crawl delays only decide
//! *when* a domain is offered; the lease transition decides *whether*.

use crate::bus::FetchError;
use crate::config::PolitenessConfig;
use crate::jobs::JobIdMinter;
use crate::robots::{effective_crawl_delay_ms, RobotsPolicy};
use crate::state::{DomainRecord, DomainStatus, RobotsOutcome, RobotsStatus, WarningKind};
use crate::storage::DomainStore;
use crate::SumiError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// An origin leased to a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedDomain {
    pub origin: String,
    pub job_id: u64,
}

/// How a failed robots check was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotsErrorClass {
    /// 404/410: everything allowed, minimum delay
    NotFound,
    /// Anything else recoverable: everything allowed, robots-error delay
    Transient,
    /// The domain is put in `error` until an operator reset
    HostNotFound,
}

impl RobotsErrorClass {
    pub fn classify(err: &FetchError) -> Self {
        if err.is_not_found() {
            Self::NotFound
        } else if err.warning() == WarningKind::HostNotFound {
            Self::HostNotFound
        } else {
            Self::Transient
        }
    }
}

pub struct DomainGate {
    politeness: PolitenessConfig,
    product_token: String,
    minter: Arc<JobIdMinter>,
}

impl DomainGate {
    /// Creates a gate
    ///
    /// # Arguments
    ///
    /// * `politeness` - Crawl delay limits
    /// * `product_token` - Our robots.txt user-agent token
    /// * `minter` - Source of job ids stamped on leases
    pub fn new(
        politeness: PolitenessConfig,
        product_token: impl Into<String>,
        minter: Arc<JobIdMinter>,
    ) -> Self {
        Self {
            politeness,
            product_token: product_token.into(),
            minter,
        }
    }

    /// Leases unvisited domains for a robots check
    ///
    /// Returns the subset actually locked, each with a freshly minted job id.
    pub fn lock_for_robots_check<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        worker_id: &str,
        origins: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<LockedDomain>, SumiError> {
        let mut locked = Vec::new();
        for origin in origins {
            let job_id = self.minter.next();
            if storage.try_lock_for_robots(origin, worker_id, job_id, now)? {
                locked.push(LockedDomain {
                    origin: origin.clone(),
                    job_id,
                });
            } else {
                tracing::debug!("Robots lock on {} lost to another job", origin);
            }
        }
        Ok(locked)
    }

    /// Leases ready domains whose next allowed time has passed for a crawl
    pub fn lock_for_crawl<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        worker_id: &str,
        origins: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<LockedDomain>, SumiError> {
        let mut locked = Vec::new();
        for origin in origins {
            let job_id = self.minter.next();
            if storage.try_lock_for_crawl(origin, worker_id, job_id, now)? {
                locked.push(LockedDomain {
                    origin: origin.clone(),
                    job_id,
                });
            } else {
                tracing::debug!("Crawl lock on {} refused", origin);
            }
        }
        Ok(locked)
    }

    /// Stores a fetched robots.txt and makes the domain crawlable
    ///
    /// Returns false when `job_id` no longer holds the domain.
    pub fn save_robots_ok<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        origin: &str,
        job_id: u64,
        robots_text: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SumiError> {
        let policy = RobotsPolicy::from_text(robots_text);
        let crawl_delay_ms = effective_crawl_delay_ms(
            policy.crawl_delay_ms(&self.product_token),
            &self.politeness,
        );
        let outcome = RobotsOutcome {
            status: DomainStatus::Ready,
            robots_status: RobotsStatus::Done,
            robots_text: Some(robots_text.to_string()),
            crawl_delay_ms,
            error: None,
        };
        tracing::debug!("robots.txt of {} read, crawl delay {} ms", origin, crawl_delay_ms);
        Ok(storage.save_robots_outcome(origin, job_id, &outcome, now)?)
    }

    /// Applies a failed robots check
    pub fn save_robots_error<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        origin: &str,
        job_id: u64,
        err: &FetchError,
        now: DateTime<Utc>,
    ) -> Result<(RobotsErrorClass, bool), SumiError> {
        let class = RobotsErrorClass::classify(err);
        let saved = match class {
            RobotsErrorClass::NotFound => {
                let outcome = RobotsOutcome {
                    status: DomainStatus::Ready,
                    robots_status: RobotsStatus::NotFound,
                    robots_text: None,
                    crawl_delay_ms: effective_crawl_delay_ms(None, &self.politeness),
                    error: None,
                };
                storage.save_robots_outcome(origin, job_id, &outcome, now)?
            }
            RobotsErrorClass::Transient => {
                let outcome = RobotsOutcome {
                    status: DomainStatus::Ready,
                    robots_status: RobotsStatus::Error,
                    robots_text: None,
                    crawl_delay_ms: self
                        .politeness
                        .robots_error_delay_ms
                        .max(self.politeness.minimum_crawl_delay_ms),
                    error: Some(err.to_string()),
                };
                let saved = storage.save_robots_outcome(origin, job_id, &outcome, now)?;
                if saved {
                    storage.increment_warning(origin, WarningKind::RobotsError)?;
                }
                saved
            }
            RobotsErrorClass::HostNotFound => {
                let saved = storage.mark_host_not_found(origin, job_id, &err.to_string(), now)?;
                if saved {
                    storage.increment_warning(origin, WarningKind::HostNotFound)?;
                    tracing::warn!("Host of {} not found, domain set to error", origin);
                }
                saved
            }
        };
        Ok((class, saved))
    }

    /// Records a request issued at `accessed_at`
    pub fn set_next_crawl_allowed<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        origin: &str,
        accessed_at: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, SumiError> {
        Ok(storage.advance_next_allowed(origin, accessed_at)?)
    }

    pub fn release_crawl<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        origin: &str,
        job_id: u64,
        now: DateTime<Utc>,
    ) -> Result<bool, SumiError> {
        Ok(storage.release_crawl(origin, job_id, now)?)
    }

    /// Crawling domain whose host vanished mid-job
    pub fn mark_host_not_found<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        origin: &str,
        job_id: u64,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SumiError> {
        let marked = storage.mark_host_not_found(origin, job_id, message, now)?;
        if marked {
            tracing::warn!("Host of {} not found while crawling: {}", origin, message);
        }
        Ok(marked)
    }

    /// Operator reset of a domain
    pub fn reset_domain<S: DomainStore + ?Sized>(
        &self,
        storage: &mut S,
        origin: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SumiError> {
        let reset = storage.reset_domain(origin, now)?;
        if reset {
            tracing::info!("Domain {} reset", origin);
        }
        Ok(reset)
    }

    /// Whether the cached robots policy of a domain allows fetching `url`
    pub fn is_allowed(&self, domain: &DomainRecord, url: &str) -> bool {
        if domain.robots_allows_all() {
            return true;
        }
        RobotsPolicy::from_cached(domain.robots_text.as_deref()).is_allowed(url, &self.product_token)
    }
}
