//! Crash artifact inventory over a paginated object listing.
//!
//! Pages are fetched sequentially until the listing stops returning a
//! continuation token. Providers give no ordering guarantee, so the result
//! is treated as an unordered set. When site scoping is enforced only
//! objects with the current site name as one of their path segments are
//! kept.

pub mod listing;

pub use listing::{ListPage, ListingError, LocalDirectoryListing, ObjectListing, RemoteObject};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dk_common::CrashArtifactDescriptor;
use tracing::{debug, info, warn};

use crate::capabilities::SiteScoping;
use crate::logging::event_names;

/// Logical directory crash artifacts are written to.
pub const ARTIFACT_DIRECTORY: &str = "CrashDumps";

/// Which objects survive site scoping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteFilter {
    /// Keep everything.
    Disabled,
    /// Keep objects with this exact (case-insensitive) path segment.
    Site(String),
    /// Scoping is enforced but the site is unknown.
    ExcludeAll,
}

impl SiteFilter {
    pub fn resolve(scoping: SiteScoping, site_name: Option<&str>) -> Self {
        if !scoping.is_enforced() {
            return SiteFilter::Disabled;
        }
        match site_name.map(str::trim).filter(|s| !s.is_empty()) {
            Some(site) => SiteFilter::Site(site.to_string()),
            None => {
                warn!("site scoping enforced without a site name, excluding all artifacts");
                SiteFilter::ExcludeAll
            }
        }
    }

    pub fn admits(&self, relative_path: &str) -> bool {
        match self {
            SiteFilter::Disabled => true,
            SiteFilter::ExcludeAll => false,
            SiteFilter::Site(site) => relative_path
                .split('/')
                .any(|segment| segment.eq_ignore_ascii_case(site)),
        }
    }
}

/// Lists crash artifacts from optional storage.
pub struct RemoteArtifactInventory<'a> {
    listing: Option<&'a dyn ObjectListing>,
    directory: String,
    filter: SiteFilter,
    include_locator: bool,
}

impl<'a> RemoteArtifactInventory<'a> {
    /// `None` storage yields an empty inventory.
    pub fn new(listing: Option<&'a dyn ObjectListing>) -> Self {
        Self {
            listing,
            directory: ARTIFACT_DIRECTORY.to_string(),
            filter: SiteFilter::Disabled,
            include_locator: false,
        }
    }

    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = directory.into();
        self
    }

    pub fn with_site_filter(mut self, filter: SiteFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_locator(mut self, include: bool) -> Self {
        self.include_locator = include;
        self
    }

    /// Every object under the directory, across all pages.
    pub fn list_objects(&self) -> Result<Vec<RemoteObject>, ListingError> {
        let Some(listing) = self.listing else {
            debug!("no storage configured");
            return Ok(Vec::new());
        };

        let mut objects = Vec::new();
        let mut seen_tokens = HashSet::new();
        let mut token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = listing.list(&self.directory, token.as_deref())?;
            pages += 1;
            debug!(
                event = event_names::INVENTORY_PAGE,
                page = pages,
                items = page.items.len(),
                more = page.next_token.is_some(),
                "listing page fetched"
            );
            objects.extend(page.items);

            match page.next_token {
                Some(next) => {
                    if !seen_tokens.insert(next.clone()) {
                        return Err(ListingError::StalledToken(next));
                    }
                    token = Some(next);
                }
                None => break,
            }
        }

        Ok(objects)
    }

    /// Site-filtered artifact descriptors.
    pub fn artifacts(&self) -> Result<Vec<CrashArtifactDescriptor>, ListingError> {
        let objects = self.list_objects()?;
        let total = objects.len();
        let artifacts: Vec<_> = objects
            .iter()
            .filter(|o| self.filter.admits(&relative_path(o)))
            .map(|o| describe(o, self.include_locator))
            .collect();

        info!(
            event = event_names::INVENTORY_FINISHED,
            listed = total,
            kept = artifacts.len(),
            "artifact inventory complete"
        );
        Ok(artifacts)
    }
}

/// Locator with the container prefix and leading `/` removed.
pub fn relative_path(object: &RemoteObject) -> String {
    let container = object.container_locator.trim_end_matches('/');
    let rest = if container.is_empty() {
        object.locator.as_str()
    } else {
        object
            .locator
            .strip_prefix(container)
            .unwrap_or(&object.locator)
    };
    rest.trim_start_matches('/').to_string()
}

/// Build the descriptor for one object.
pub fn describe(object: &RemoteObject, include_locator: bool) -> CrashArtifactDescriptor {
    let relative = relative_path(object);
    let file_name = relative.rsplit('/').next().unwrap_or_default().to_string();
    CrashArtifactDescriptor {
        exit_code: exit_code_token(&file_name),
        absolute_locator: include_locator.then(|| object.locator.clone()),
        // DateTime<Utc>::default() is the Unix epoch.
        created: object.created.unwrap_or_else(DateTime::<Utc>::default),
        relative_path: relative,
        file_name,
    }
}

/// The `0x…` hex segment of a `_`-separated file stem, e.g. `0xC00000FD`
/// in `w3wp_4120_0xC00000FD.dmp`.
pub fn exit_code_token(file_name: &str) -> Option<String> {
    let stem = file_name
        .rsplit_once('.')
        .map_or(file_name, |(stem, _)| stem);
    stem.split('_')
        .find(|segment| {
            segment
                .strip_prefix("0x")
                .or_else(|| segment.strip_prefix("0X"))
                .is_some_and(|hex| !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()))
        })
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct PagedStub {
        pages: Vec<ListPage>,
        calls: RefCell<Vec<Option<String>>>,
    }

    impl ObjectListing for PagedStub {
        fn list(&self, _directory: &str, token: Option<&str>) -> Result<ListPage, ListingError> {
            let mut calls = self.calls.borrow_mut();
            let index = calls.len();
            calls.push(token.map(str::to_string));
            Ok(self.pages.get(index).cloned().unwrap_or_default())
        }
    }

    fn object(locator: &str) -> RemoteObject {
        RemoteObject {
            locator: locator.to_string(),
            created: None,
            container_locator: "/container".to_string(),
        }
    }

    #[test]
    fn follows_tokens_through_empty_pages() {
        let stub = PagedStub {
            pages: vec![
                ListPage {
                    items: vec![object("/container/a.dmp"), object("/container/b.dmp")],
                    next_token: Some("A".into()),
                },
                ListPage {
                    items: vec![],
                    next_token: Some("B".into()),
                },
                ListPage {
                    items: vec![object("/container/c.dmp")],
                    next_token: None,
                },
            ],
            calls: RefCell::new(Vec::new()),
        };
        let objects = RemoteArtifactInventory::new(Some(&stub))
            .list_objects()
            .unwrap();
        assert_eq!(objects.len(), 3);
        assert_eq!(
            *stub.calls.borrow(),
            vec![None, Some("A".to_string()), Some("B".to_string())]
        );
    }

    #[test]
    fn repeated_token_is_stalled() {
        let page = ListPage {
            items: vec![],
            next_token: Some("same".into()),
        };
        let stub = PagedStub {
            pages: vec![page.clone(), page],
            calls: RefCell::new(Vec::new()),
        };
        let err = RemoteArtifactInventory::new(Some(&stub))
            .list_objects()
            .unwrap_err();
        assert!(matches!(err, ListingError::StalledToken(t) if t == "same"));
    }

    #[test]
    fn absent_storage_is_empty() {
        let inventory = RemoteArtifactInventory::new(None);
        assert!(inventory.artifacts().unwrap().is_empty());
    }

    #[test]
    fn site_filter_matches_whole_segments() {
        let filter = SiteFilter::resolve(SiteScoping::Unknown, Some("Site1"));
        assert!(filter.admits("site1/dump1.dmp"));
        assert!(!filter.admits("site2/dump2.dmp"));
        assert!(!filter.admits("site10/dump.dmp"));
        assert!(!filter.admits("mysite1.dmp"));
    }

    #[test]
    fn filter_resolution() {
        assert_eq!(
            SiteFilter::resolve(SiteScoping::Disabled, Some("site1")),
            SiteFilter::Disabled
        );
        assert_eq!(
            SiteFilter::resolve(SiteScoping::Enabled, None),
            SiteFilter::ExcludeAll
        );
        assert!(!SiteFilter::ExcludeAll.admits("anything"));
    }

    #[test]
    fn descriptor_derivation() {
        let obj = object("/container/site1/w3wp_4120_0xC00000FD.dmp");
        let without = describe(&obj, false);
        assert_eq!(without.file_name, "w3wp_4120_0xC00000FD.dmp");
        assert_eq!(without.relative_path, "site1/w3wp_4120_0xC00000FD.dmp");
        assert_eq!(without.created.timestamp(), 0);
        assert_eq!(without.exit_code.as_deref(), Some("0xC00000FD"));
        assert!(without.absolute_locator.is_none());

        let with = describe(&obj, true);
        assert_eq!(
            with.absolute_locator.as_deref(),
            Some("/container/site1/w3wp_4120_0xC00000FD.dmp")
        );
    }

    #[test]
    fn exit_code_token_requires_hex() {
        assert_eq!(exit_code_token("app_0x_1.dmp"), None);
        assert_eq!(exit_code_token("app_0xZZ.dmp"), None);
        assert_eq!(exit_code_token("app.dmp"), None);
        assert_eq!(exit_code_token("app_0X1f"), Some("0X1f".to_string()));
    }
}
