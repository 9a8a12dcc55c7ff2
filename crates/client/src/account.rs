// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Which namespace paths are resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum RootInfo {
    User {
        root_namespace_id: String,
        home_namespace_id: String,
    },
    Team {
        root_namespace_id: String,
        home_namespace_id: String,
        home_path:         String,
    },
}

impl RootInfo {
    #[must_use]
    pub fn root_namespace_id(&self) -> &str {
        match self {
            Self::User {
                root_namespace_id, ..
            }
            | Self::Team {
                root_namespace_id, ..
            } => root_namespace_id,
        }
    }

    /// Home folder of the user relative to the root namespace. Empty for
    /// user roots.
    #[must_use]
    pub fn home_path(&self) -> &str {
        match self {
            Self::User { .. } => "",
            Self::Team { home_path, .. } => home_path,
        }
    }

    #[must_use]
    pub const fn is_team_space(&self) -> bool { matches!(self, Self::Team { .. }) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AccountType {
    Basic,
    Pro,
    Business,
    #[default]
    #[serde(other)]
    Other,
}

/// Public information about any account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id:        String,
    pub display_name:      String,
    pub email:             String,
    #[serde(default)]
    pub abbreviated_name:  String,
    #[serde(default)]
    pub email_verified:    bool,
    #[serde(default)]
    pub disabled:          bool,
    #[serde(default)]
    pub profile_photo_url: Option<String>,
}

/// The linked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullAccount {
    #[serde(flatten)]
    pub account:        Account,
    #[serde(default)]
    pub account_type:   AccountType,
    pub root_info:      RootInfo,
    #[serde(default)]
    pub country:        Option<String>,
    #[serde(default)]
    pub locale:         String,
    #[serde(default)]
    pub team:           Option<Team>,
    #[serde(default)]
    pub team_member_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id:   String,
    pub name: String,
}

/// Space allocation as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum SpaceAllocation {
    Individual {
        allocated: u64,
    },
    Team {
        used:                             u64,
        allocated:                        u64,
        /// Zero when members may use the whole team quota.
        #[serde(default)]
        user_within_team_space_allocated: u64,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSpaceUsage {
    pub used:       u64,
    pub allocation: SpaceAllocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSpaceUsage {
    pub used:      u64,
    pub allocated: u64,
}

/// Space usage of the linked account, with team quotas resolved to what the
/// user may actually consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceUsage {
    pub used:       u64,
    pub allocated:  u64,
    pub team_usage: Option<TeamSpaceUsage>,
}

impl From<RawSpaceUsage> for SpaceUsage {
    fn from(raw: RawSpaceUsage) -> Self {
        match raw.allocation {
            SpaceAllocation::Individual { allocated } => Self {
                used: raw.used,
                allocated,
                team_usage: None,
            },
            SpaceAllocation::Team {
                used,
                allocated,
                user_within_team_space_allocated,
            } => Self {
                used:       raw.used,
                allocated:  if user_within_team_space_allocated == 0 {
                    allocated
                } else {
                    user_within_team_space_allocated
                },
                team_usage: Some(TeamSpaceUsage { used, allocated }),
            },
            SpaceAllocation::Other => Self {
                used:       raw.used,
                allocated:  0,
                team_usage: None,
            },
        }
    }
}

impl SpaceUsage {
    /// Fraction of the allocation in use, `None` for unknown allocations.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction_used(&self) -> Option<f64> {
        (self.allocated > 0).then(|| self.used as f64 / self.allocated as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAudience {
    #[default]
    Public,
    Team,
    NoOne,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkAccessLevel {
    #[default]
    Viewer,
    Editor,
    #[serde(other)]
    Other,
}

/// Options for a new shared link.
#[derive(Debug, Clone, PartialEq, Eq, Default, bon::Builder, Serialize, Deserialize)]
pub struct LinkSettings {
    #[builder(default)]
    pub audience:       LinkAudience,
    #[builder(default)]
    pub access:         LinkAccessLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_download: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub password:       Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_timestamp"
    )]
    pub expires:        Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkPermissions {
    pub can_revoke:         bool,
    pub allow_download:     bool,
    pub effective_audience: LinkAudience,
    pub link_access_level:  LinkAccessLevel,
    #[serde(default)]
    pub require_password:   bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedLinkMetadata {
    pub url:         String,
    pub name:        String,
    #[serde(default)]
    pub path_lower:  Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "optional_timestamp"
    )]
    pub expires:     Option<Timestamp>,
    pub permissions: LinkPermissions,
}

mod optional_timestamp {
    use jiff::Timestamp;
    use serde::{Deserialize, Deserializer, Serializer, de};

    use crate::types::utc_timestamp;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(ts: &Option<Timestamp>, serializer: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.collect_str(ts),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Timestamp>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| utc_timestamp::parse(&raw).map_err(de::Error::custom))
            .transpose()
    }
}
