use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use scraper::{Html, Selector};
use url::Url;

use super::auth::Session;
use crate::browser::scripts;
use crate::models::catalog::{CatalogEntry, EntrySelector};
use crate::models::errors::CatalogError;
use crate::models::settings::SiteSettings;

static ENTRY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("li[data-page-hash]").unwrap());

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".navigation-page-title").unwrap());

/// Reads the club's lesson navigation. Entries are numbered from 1 in
/// listing order; a lesson listed twice keeps its first position.
pub fn parse_catalog(html: &str, site: &SiteSettings) -> Vec<CatalogEntry> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for item in doc.select(&ENTRY_SEL) {
        let Some(hash) = item.value().attr("data-page-hash").map(str::trim) else {
            continue;
        };
        if hash.is_empty() || !seen.insert(hash.to_string()) {
            continue;
        }
        let title = item
            .select(&TITLE_SEL)
            .next()
            .map(|t| t.text().collect::<String>())
            .unwrap_or_else(|| item.text().collect::<String>());
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        let Ok(lesson_url) = Url::parse(&site.lesson_url(hash)) else {
            tracing::warn!("[catalog] skipping lesson with unusable hash {:?}", hash);
            continue;
        };
        entries.push(CatalogEntry {
            index: entries.len() + 1,
            title: if title.is_empty() { hash.to_string() } else { title },
            lesson_url,
        });
    }

    entries
}

pub async fn list_entries(session: &Session) -> Result<Vec<CatalogEntry>, CatalogError> {
    let ctx = session.context();
    let settings = session.settings();
    let timeout = Duration::from_secs(settings.timeouts.catalog_secs);
    let poll = Duration::from_millis(settings.timeouts.poll_interval_ms);

    tracing::info!("[catalog] opening {}", settings.site.club_url);
    ctx.navigate(&settings.site.club_url).await?;
    if session.is_login_page(&ctx.current_url().await?) {
        return Err(CatalogError::SessionExpired);
    }
    session.dismiss_overlays().await?;

    if !ctx.wait_for(scripts::CATALOG_READY, timeout, poll).await? {
        return Err(CatalogError::CatalogTimeout(timeout));
    }

    let entries = parse_catalog(&ctx.page_html().await?, &settings.site);
    if entries.is_empty() {
        return Err(CatalogError::CatalogTimeout(timeout));
    }
    tracing::info!("[catalog] {} lessons", entries.len());
    Ok(entries)
}

/// Resolves an index or a case-insensitive title substring.
pub fn find_entry<'a>(
    entries: &'a [CatalogEntry],
    selector: &EntrySelector,
) -> Result<&'a CatalogEntry, CatalogError> {
    match selector {
        EntrySelector::Index(n) => entries
            .iter()
            .find(|e| e.index == *n)
            .ok_or_else(|| CatalogError::NotFound(selector.to_string())),
        EntrySelector::Title(needle) => {
            let needle = needle.to_lowercase();
            let matches: Vec<&CatalogEntry> = entries
                .iter()
                .filter(|e| e.title.to_lowercase().contains(&needle))
                .collect();
            match matches.as_slice() {
                [] => Err(CatalogError::NotFound(selector.to_string())),
                [one] => Ok(*one),
                many => Err(CatalogError::AmbiguousSelector {
                    selector: selector.to_string(),
                    candidates: many.iter().map(|e| (e.index, e.title.clone())).collect(),
                }),
            }
        }
    }
}
