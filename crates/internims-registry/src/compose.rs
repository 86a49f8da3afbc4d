//! Response bodies built from the live peer set.

use crate::peers::PeerRecord;
use internims_types::{ScopedUser, SelfExclusion};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Canonical wire form of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerView {
    pub id: String,
    pub name: String,
    pub api_uri: String,
    pub pubkey: String,
    pub timestamp: String,
    pub userlist: Vec<String>,
}

impl From<&PeerRecord> for PeerView {
    fn from(peer: &PeerRecord) -> Self {
        Self {
            id: peer.site_id.clone(),
            name: peer.display_name.clone(),
            api_uri: peer.api_uri.clone(),
            pubkey: peer.public_key.clone(),
            timestamp: peer.last_seen_at.clone(),
            userlist: peer.user_list.clone(),
        }
    }
}

/// A pointer to a site in the cross-index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SiteRef {
    pub id: String,
    pub name: String,
}

/// Body returned to a site after a successful announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnouncementResponse {
    pub sites: Vec<PeerView>,
    /// Requester's usernames mapped to the other live sites that list them.
    pub users: BTreeMap<String, Vec<SiteRef>>,
}

/// Builds the announcement response for `requester` from the live peers.
///
/// `users` only ever looks at peers other than the requester, so the
/// requester's own `userlist` never feeds the cross-index regardless of
/// `mode`. Entries that are not `<username>#<site>` are ignored.
pub fn compose_response(
    peers: &[PeerRecord],
    requester: &str,
    mode: SelfExclusion,
) -> AnnouncementResponse {
    let mut users: BTreeMap<String, BTreeSet<SiteRef>> = BTreeMap::new();

    for peer in peers.iter().filter(|p| p.site_id != requester) {
        for entry in &peer.user_list {
            let Ok(user) = entry.parse::<ScopedUser>() else {
                continue;
            };
            if user.home_site != requester {
                continue;
            }
            users.entry(user.username).or_default().insert(SiteRef {
                id: peer.site_id.clone(),
                name: peer.display_name.clone(),
            });
        }
    }

    let mut sites: Vec<PeerView> = peers
        .iter()
        .filter(|p| mode == SelfExclusion::Include || p.site_id != requester)
        .map(PeerView::from)
        .collect();
    sites.sort_by(|a, b| a.id.cmp(&b.id));

    AnnouncementResponse {
        sites,
        users: users
            .into_iter()
            .map(|(name, refs)| (name, refs.into_iter().collect()))
            .collect(),
    }
}

/// Per-site entry of the status overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemoteStatus {
    pub id: String,
    /// Present only when the site itself is live.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Number of users recorded at this live site.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_users: Option<usize>,
    /// Distinct users homed at this site that appear at other live sites.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_access: Option<usize>,
}

/// Federation-wide status overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemotesOverview {
    pub sites: Vec<RemoteStatus>,
    pub num_sites: usize,
}

/// Summarizes who has access where across the live peers.
///
/// Sites that are not live still appear when users homed there are listed
/// at a live site.
pub fn remotes_overview(peers: &[PeerRecord]) -> RemotesOverview {
    let mut statuses: BTreeMap<String, RemoteStatus> = BTreeMap::new();
    let mut homed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for peer in peers {
        let status = statuses.entry(peer.site_id.clone()).or_default();
        status.name = Some(peer.display_name.clone());
        status.remote_users = Some(peer.user_list.len());

        for entry in &peer.user_list {
            let Ok(user) = entry.parse::<ScopedUser>() else {
                continue;
            };
            if user.home_site != peer.site_id {
                homed.entry(user.home_site).or_default().insert(user.username);
            }
        }
    }

    for (site_id, users) in homed {
        statuses.entry(site_id).or_default().remote_access = Some(users.len());
    }

    let sites: Vec<RemoteStatus> = statuses
        .into_iter()
        .map(|(id, status)| RemoteStatus { id, ..status })
        .collect();
    RemotesOverview {
        num_sites: sites.len(),
        sites,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, users: &[&str]) -> PeerRecord {
        PeerRecord {
            site_id: id.to_string(),
            display_name: format!("Site {id}"),
            api_uri: format!("https://{id}.example.org/api"),
            public_key: "KEY".to_string(),
            user_list: users.iter().map(|u| u.to_string()).collect(),
            last_seen_at: "2014-05-01T12:00:00.000000Z".to_string(),
        }
    }

    fn site_ids(response: &AnnouncementResponse) -> Vec<&str> {
        response.sites.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn cross_index_lists_requesters_users_at_other_sites() {
        let peers = [
            peer("A", &["alice#A", "zed#B"]),
            peer("B", &["alice#A"]),
            peer("C", &["bob#C"]),
        ];

        for mode in [SelfExclusion::Exclude, SelfExclusion::Include] {
            let response = compose_response(&peers, "A", mode);
            assert_eq!(response.users.len(), 1, "{mode:?}");
            assert_eq!(
                response.users["alice"],
                [SiteRef {
                    id: "B".into(),
                    name: "Site B".into()
                }]
            );
        }

        assert_eq!(
            site_ids(&compose_response(&peers, "A", SelfExclusion::Exclude)),
            ["B", "C"]
        );
        assert_eq!(
            site_ids(&compose_response(&peers, "A", SelfExclusion::Include)),
            ["A", "B", "C"]
        );
    }

    #[test]
    fn site_refs_are_sorted_and_unique() {
        let peers = [
            peer("D", &["alice#A"]),
            peer("B", &["alice#A", "bob#A", "bad-entry"]),
        ];
        let response = compose_response(&peers, "A", SelfExclusion::Exclude);

        let alice: Vec<_> = response.users["alice"].iter().map(|r| r.id.as_str()).collect();
        assert_eq!(alice, ["B", "D"]);
        assert_eq!(response.users["bob"].len(), 1);
        assert_eq!(site_ids(&response), ["B", "D"]);
    }

    #[test]
    fn peer_view_uses_canonical_field_names() {
        let view = PeerView::from(&peer("B", &["alice#A"]));
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "B",
                "name": "Site B",
                "api_uri": "https://B.example.org/api",
                "pubkey": "KEY",
                "timestamp": "2014-05-01T12:00:00.000000Z",
                "userlist": ["alice#A"],
            })
        );
    }

    #[test]
    fn overview_counts_users_and_access() {
        let peers = [
            peer("A", &["alice#A", "bob#B", "carol#B", "dave#Z"]),
            peer("B", &["alice#A", "erin#A"]),
        ];
        let overview = remotes_overview(&peers);

        assert_eq!(overview.num_sites, 3);
        assert_eq!(
            overview.sites,
            [
                RemoteStatus {
                    id: "A".into(),
                    name: Some("Site A".into()),
                    remote_users: Some(4),
                    remote_access: Some(2),
                },
                RemoteStatus {
                    id: "B".into(),
                    name: Some("Site B".into()),
                    remote_users: Some(2),
                    remote_access: Some(2),
                },
                RemoteStatus {
                    id: "Z".into(),
                    name: None,
                    remote_users: None,
                    remote_access: Some(1),
                },
            ]
        );
    }
}
