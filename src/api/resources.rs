use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::db::Partition;

use super::Params;

/// Read endpoints the display client knows how to serve from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
  DashboardStats,
  PriorityTasks,
  TodayMeetings,
  InboxStats,
}

impl ResourceType {
  pub const ALL: [ResourceType; 4] = [
    ResourceType::DashboardStats,
    ResourceType::PriorityTasks,
    ResourceType::TodayMeetings,
    ResourceType::InboxStats,
  ];

  pub fn name(self) -> &'static str {
    match self {
      ResourceType::DashboardStats => "dashboard-stats",
      ResourceType::PriorityTasks => "priority-tasks",
      ResourceType::TodayMeetings => "today-meetings",
      ResourceType::InboxStats => "inbox-stats",
    }
  }

  pub fn partition(self) -> Partition {
    match self {
      ResourceType::DashboardStats | ResourceType::InboxStats => Partition::Dashboard,
      ResourceType::PriorityTasks => Partition::Tasks,
      ResourceType::TodayMeetings => Partition::Meetings,
    }
  }

  /// Cache key used when no extra parameters are given.
  pub fn base_key(self) -> &'static str {
    match self {
      ResourceType::DashboardStats => "stats",
      ResourceType::PriorityTasks => "priority",
      ResourceType::TodayMeetings => "today",
      ResourceType::InboxStats => "inbox",
    }
  }

  pub fn endpoint(self) -> &'static str {
    match self {
      ResourceType::DashboardStats => "/dashboard/stats",
      ResourceType::PriorityTasks => "/tasks",
      ResourceType::TodayMeetings => "/meetings",
      ResourceType::InboxStats => "/workflow/inbox/stats",
    }
  }

  /// Query parameters every request for this resource carries.
  pub fn default_params(self, today: NaiveDate) -> Params {
    let mut params = Params::new();
    match self {
      ResourceType::PriorityTasks => {
        params.insert("priority".into(), "HIGH,URGENT".into());
        params.insert("status".into(), "NEW,IN_PROGRESS".into());
        params.insert("limit".into(), "10".into());
      }
      ResourceType::TodayMeetings => {
        params.insert("startDate".into(), today.format("%Y-%m-%d").to_string());
      }
      ResourceType::DashboardStats | ResourceType::InboxStats => {}
    }
    params
  }

  /// Defaults overlaid with the caller's parameters.
  pub fn request_params(self, today: NaiveDate, extra: &Params) -> Params {
    let mut params = self.default_params(today);
    params.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    params
  }

  /// Cache key for a request with the caller's extra parameters.
  ///
  /// Without extras this is the base key. Otherwise a short SHA-256 digest of
  /// the sorted `k=v` pairs is appended, so equal parameter sets always map to
  /// the same key.
  pub fn cache_key(self, extra: &Params) -> String {
    if extra.is_empty() {
      return self.base_key().to_string();
    }

    let canonical = extra
      .iter()
      .map(|(k, v)| format!("{}={}", k, v))
      .collect::<Vec<_>>()
      .join("&");
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{}:{}", self.base_key(), &hex::encode(digest)[..16])
  }
}

impl fmt::Display for ResourceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for ResourceType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    ResourceType::ALL
      .into_iter()
      .find(|r| r.name().eq_ignore_ascii_case(s))
      .ok_or_else(|| {
        eyre!(
          "Unknown resource '{}'. Expected one of: dashboard-stats, priority-tasks, today-meetings, inbox-stats",
          s
        )
      })
  }
}

/// One entry of the data set refreshed after every sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriticalEndpoint {
  pub resource: ResourceType,
  pub params: Params,
}

impl CriticalEndpoint {
  pub fn partition(&self) -> Partition {
    self.resource.partition()
  }

  pub fn key(&self) -> &'static str {
    self.resource.base_key()
  }
}

/// The four resources the display needs to render offline, with default params.
pub fn critical_set(today: NaiveDate) -> Vec<CriticalEndpoint> {
  ResourceType::ALL
    .into_iter()
    .map(|resource| CriticalEndpoint {
      resource,
      params: resource.default_params(today),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()
  }

  #[test]
  fn test_resource_names_round_trip() {
    for resource in ResourceType::ALL {
      assert_eq!(resource.name().parse::<ResourceType>().unwrap(), resource);
    }
    assert!("weather".parse::<ResourceType>().is_err());
  }

  #[test]
  fn test_default_params() {
    let params = ResourceType::PriorityTasks.default_params(today());
    assert_eq!(params["priority"], "HIGH,URGENT");
    assert_eq!(params["status"], "NEW,IN_PROGRESS");
    assert_eq!(params["limit"], "10");

    let params = ResourceType::TodayMeetings.default_params(today());
    assert_eq!(params["startDate"], "2024-03-09");

    assert!(ResourceType::DashboardStats.default_params(today()).is_empty());
  }

  #[test]
  fn test_caller_params_override_defaults() {
    let mut extra = Params::new();
    extra.insert("limit".into(), "25".into());
    let params = ResourceType::PriorityTasks.request_params(today(), &extra);
    assert_eq!(params["limit"], "25");
    assert_eq!(params["priority"], "HIGH,URGENT");
  }

  #[test]
  fn test_cache_key_distinguishes_params() {
    let none = Params::new();
    assert_eq!(ResourceType::PriorityTasks.cache_key(&none), "priority");

    let mut a = Params::new();
    a.insert("limit".into(), "25".into());
    let mut b = Params::new();
    b.insert("limit".into(), "50".into());

    let key_a = ResourceType::PriorityTasks.cache_key(&a);
    let key_b = ResourceType::PriorityTasks.cache_key(&b);
    assert!(key_a.starts_with("priority:"));
    assert_ne!(key_a, key_b);
    assert_eq!(key_a, ResourceType::PriorityTasks.cache_key(&a.clone()));
  }

  #[test]
  fn test_critical_set() {
    let set = critical_set(today());
    assert_eq!(set.len(), 4);
    assert_eq!(set[0].partition(), Partition::Dashboard);
    assert_eq!(set[0].key(), "stats");
    assert_eq!(set[3].partition(), Partition::Dashboard);
    assert_eq!(set[3].key(), "inbox");
    assert_eq!(set[2].params["startDate"], "2024-03-09");
  }
}
