use std::fmt;

use url::Url;

use super::media::MediaKind;

/// One lesson as listed by the club, 1-based in listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub index: usize,
    pub title: String,
    pub lesson_url: Url,
}

impl fmt::Display for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySelector {
    Index(usize),
    Title(String),
}

impl EntrySelector {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed.parse::<usize>() {
            Ok(n) => Self::Index(n),
            Err(_) => Self::Title(trimmed.to_string()),
        }
    }
}

impl fmt::Display for EntrySelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(n) => write!(f, "{}", n),
            Self::Title(t) => write!(f, "{:?}", t),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Entry(EntrySelector),
    /// A lesson page outside the listing; extracted without the catalog.
    LessonUrl(Url),
    /// A media URL used as-is.
    MediaUrl(Url),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Targets(Vec<Target>),
}

impl Selection {
    /// Parses user selectors: `all`, integer indices, comma-separated indices,
    /// title substrings or absolute URLs.
    pub fn parse(inputs: &[String]) -> Self {
        if inputs.is_empty() || inputs.iter().any(|s| s.trim().eq_ignore_ascii_case("all")) {
            return Self::All;
        }

        let mut targets = Vec::new();
        for raw in inputs {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            if let Some(url) = parse_http_url(raw) {
                if MediaKind::from_url(&url).is_some() {
                    targets.push(Target::MediaUrl(url));
                } else {
                    targets.push(Target::LessonUrl(url));
                }
                continue;
            }
            if let Some(indices) = parse_index_list(raw) {
                targets.extend(indices.into_iter().map(|n| Target::Entry(EntrySelector::Index(n))));
                continue;
            }
            targets.push(Target::Entry(EntrySelector::parse(raw)));
        }
        Self::Targets(targets)
    }
}

fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

fn parse_index_list(raw: &str) -> Option<Vec<usize>> {
    if !raw.contains(',') {
        return None;
    }
    raw.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(|p| p.trim().parse::<usize>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_or_all_selects_everything() {
        assert_eq!(Selection::parse(&[]), Selection::All);
        assert_eq!(Selection::parse(&strings(&["ALL"])), Selection::All);
    }

    #[test]
    fn comma_list_expands_to_indices() {
        assert_eq!(
            Selection::parse(&strings(&["1, 3,5"])),
            Selection::Targets(vec![
                Target::Entry(EntrySelector::Index(1)),
                Target::Entry(EntrySelector::Index(3)),
                Target::Entry(EntrySelector::Index(5)),
            ])
        );
    }

    #[test]
    fn title_with_comma_stays_a_title() {
        assert_eq!(
            Selection::parse(&strings(&["Kata, part one"])),
            Selection::Targets(vec![Target::Entry(EntrySelector::Title(
                "Kata, part one".into()
            ))])
        );
    }

    #[test]
    fn urls_split_by_kind() {
        let sel = Selection::parse(&strings(&[
            "https://cdn.example.com/v/master.m3u8?hdntl=x",
            "https://club.example.com/lesson/abc",
        ]));
        let Selection::Targets(targets) = sel else {
            panic!("expected targets");
        };
        assert!(matches!(targets[0], Target::MediaUrl(_)));
        assert!(matches!(targets[1], Target::LessonUrl(_)));
    }

    #[test]
    fn selector_parse_index_or_title() {
        assert_eq!(EntrySelector::parse(" 7 "), EntrySelector::Index(7));
        assert_eq!(
            EntrySelector::parse("sweep"),
            EntrySelector::Title("sweep".into())
        );
    }
}
