//! Denormalized views of casts and users
//!
//! A hydrated cast carries its author profile, its channel and the client
//! that signed it, with mention placeholders in the text rewritten to
//! `@username`.

use crate::upstream::{Channel, HubApi, WarpcastApi};
use crate::Result;
use futures::future::join_all;
use hub_types::Cast;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;

/// Placeholder for mentions whose username could not be resolved
pub const UNKNOWN_USERNAME: &str = "<unknown>";

const CHANNEL_URL_PREFIXES: [&str; 3] = [
    "https://farcaster.xyz/~/channel/",
    "https://warpcast.com/~/channel/",
    "https://farcaster.group/",
];

const KNOWN_SIGNERS: [(&str, &str); 4] = [
    (
        "0x0e10fec94a39c27f6ea39191b310c13c53cb8f6be209b3c48d7278f6688df603",
        "neynar",
    ),
    (
        "0xc6dab75cc8e1d720a6f8a9aff8c6ae2eb48e5442b3a863b88413331dbde6c206",
        "artlu",
    ),
    (
        "0x4d25071459be1161bbeb299cecac7668bb04f6009e00498e3606e0839d31e064",
        "recaster-fc",
    ),
    (
        "0xba30336ba6bed65f11b79a0d5c8f78885b614b95386fcb3734f0d6aa2cb7ea1f",
        "warpcast",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydratedUser {
    pub fid: u64,
    pub username: String,
    pub display_name: Option<String>,
    pub pfp_url: Option<String>,
    pub bio: Option<String>,
    pub primary_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HydratedCast {
    #[serde(flatten)]
    pub cast: Cast,
    pub user: Option<HydratedUser>,
    pub channel: Option<Channel>,
    pub sent_by: Option<String>,
}

/// Rewrite mention placeholders in `text` as `@username `
///
/// `positions` are UTF-8 byte offsets, paired with `mentions` by index and
/// applied in ascending order. The byte at each position is replaced.
pub async fn hydrate_text<F, Fut>(
    text: Option<&str>,
    mentions: &[u64],
    positions: &[u32],
    resolve: F,
) -> Option<String>
where
    F: Fn(u64) -> Fut,
    Fut: Future<Output = Option<String>>,
{
    let text = text.filter(|t| !t.is_empty())?;
    if mentions.is_empty() {
        return Some(text.to_string());
    }

    let usernames = join_all(mentions.iter().map(|fid| resolve(*fid))).await;
    let mut placements: Vec<(usize, String)> = positions
        .iter()
        .zip(usernames)
        .map(|(pos, name)| {
            (
                *pos as usize,
                name.unwrap_or_else(|| UNKNOWN_USERNAME.to_string()),
            )
        })
        .collect();
    placements.sort_by_key(|(pos, _)| *pos);

    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len() + placements.len() * 16);
    let mut last = 0usize;

    for (pos, username) in placements {
        let pos = pos.min(bytes.len());
        out.push_str(&String::from_utf8_lossy(&bytes[last.min(pos)..pos]));
        out.push('@');
        out.push_str(&username);
        out.push(' ');
        last = (pos + 1).min(bytes.len());
    }
    out.push_str(&String::from_utf8_lossy(&bytes[last..]));

    Some(out)
}

/// Client name for a well-known signer key
pub fn sent_by(signer_key: &str) -> Option<&'static str> {
    let key = signer_key.trim().to_lowercase();
    let key = key.strip_prefix("0x").unwrap_or(&key);
    KNOWN_SIGNERS
        .iter()
        .find(|(known, _)| &known[2..] == key)
        .map(|(_, name)| *name)
}

/// Channel id for a parent URL
pub fn channel_id_from_url(url: &str, exceptions: &HashMap<String, String>) -> Option<String> {
    for prefix in CHANNEL_URL_PREFIXES {
        if let Some(id) = url.strip_prefix(prefix) {
            let id = id.trim_end_matches('/');
            if !id.is_empty() {
                return Some(id.to_string());
            }
        }
    }
    exceptions.get(url).cloned()
}

/// Builds hydrated views from the cached upstream APIs
#[derive(Clone)]
pub struct Hydrator {
    hub: HubApi,
    warpcast: WarpcastApi,
    exceptions: HashMap<String, String>,
}

impl Hydrator {
    pub fn new(hub: HubApi, warpcast: WarpcastApi, exceptions: HashMap<String, String>) -> Self {
        Self {
            hub,
            warpcast,
            exceptions,
        }
    }

    pub fn hub(&self) -> &HubApi {
        &self.hub
    }

    pub fn warpcast(&self) -> &WarpcastApi {
        &self.warpcast
    }

    /// Profile plus primary address; `None` when the fid has no username
    pub async fn user_by_fid(&self, fid: u64) -> Result<Option<HydratedUser>> {
        let (user, address) =
            futures::join!(self.hub.user_by_fid(fid), self.warpcast.primary_address(fid));

        let Some(user) = user? else {
            return Ok(None);
        };
        let primary_address = match address {
            Ok(address) => address.map(|a| a.address),
            Err(e) => {
                tracing::warn!(fid, error = %e, "Primary address lookup failed");
                None
            }
        };

        Ok(Some(HydratedUser {
            fid,
            username: user.username,
            display_name: user.display_name,
            pfp_url: user.pfp_url,
            bio: user.bio,
            primary_address,
        }))
    }

    pub async fn hydrate_text(&self, cast: &Cast) -> Option<String> {
        let source = cast.raw_text.as_deref().or(cast.text.as_deref());
        hydrate_text(
            source,
            &cast.mentions,
            &cast.mentions_positions,
            |fid| async move {
                match self.hub.username_by_fid(fid).await {
                    Ok(name) => name,
                    Err(e) => {
                        tracing::warn!(fid, error = %e, "Mention lookup failed");
                        None
                    }
                }
            },
        )
        .await
    }

    /// Channel for a cast's parent URL, if it resolves to one
    pub async fn channel_for(&self, parent_url: Option<&str>) -> Option<Channel> {
        let id = channel_id_from_url(parent_url?, &self.exceptions)?;
        match self.warpcast.channel(&id).await {
            Ok(channel) => channel,
            Err(e) => {
                tracing::warn!(channel = %id, error = %e, "Channel lookup failed");
                None
            }
        }
    }

    pub async fn hydrate_cast(&self, cast: Cast) -> Result<HydratedCast> {
        let (user, text, channel) = futures::join!(
            self.user_by_fid(cast.fid),
            self.hydrate_text(&cast),
            self.channel_for(cast.parent_url.as_deref()),
        );

        let sent_by = sent_by(&cast.signer).map(str::to_string);
        let mut cast = cast;
        cast.text = text;

        Ok(HydratedCast {
            cast,
            user: user?,
            channel,
            sent_by,
        })
    }

    /// Hydrate in order, propagating the first failure
    pub async fn hydrate_casts(&self, casts: Vec<Cast>) -> Result<Vec<HydratedCast>> {
        join_all(casts.into_iter().map(|cast| self.hydrate_cast(cast)))
            .await
            .into_iter()
            .collect()
    }
}
