//! Heuristic intent classification over raw utterances.
//!
//! Stateless, pattern-based classifiers (Russian + English). Precedence when
//! several fire on one utterance is a hard contract owned by the
//! orchestrator: route request first, then follow-up, then fresh search.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::{SearchFilters, SortBy};

/// Routing waypoint limit downstream; requested counts clamp into this range.
pub const MIN_MULTI_PLACES: usize = 2;
pub const MAX_MULTI_PLACES: usize = 5;

/// How a follow-up should be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpKind {
    /// "which is better / cheaper / Nth vs Mth": compare shown venues.
    Comparison,
    /// A concrete fact question about one shown venue.
    Detail,
    /// Anything else: escalate to the AI path with conversation context.
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    High,
    Medium,
    Low,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::High => "high",
            Urgency::Medium => "medium",
            Urgency::Low => "low",
        }
    }
}

static FOLLOW_UP_MARKERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(
            он|она|оно|они|его|её|ее|ней|нём|нем|них|ним|туда|там|
            это|этот|эта|эти|этом|тот|та|те|
            перв\w*|втор\w*|трет\w*|четв[её]рт\w*|пят\w*|
            it|its|they|them|there|this|that|these|those|
            first|second|third|fourth|fifth
        )\b",
    )
    .expect("follow-up marker pattern")
});

/// True when the utterance references previously shown results (pronouns,
/// ordinals, demonstratives, directional references).
pub fn is_follow_up(text: &str) -> bool {
    FOLLOW_UP_MARKERS.is_match(&text.to_lowercase())
}

static COMPARISON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(
            сравни\w*|лучше|хуже|дешевле|дороже|ближе|дальше|
            лучш\w*|сам\w+\s+(?:дешев|дорог|близк|хорош)\w*|
            compare|better|worse|cheaper|closer|nearest|best|cheapest|versus|vs
        )\b",
    )
    .expect("comparison pattern")
});

static ORDINAL_VS_ORDINAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(перв\w*|втор\w*|трет\w*|четв[её]рт\w*|пят\w*|first|second|third|fourth|fifth|[1-5])\b
          \s*(?:или|против|vs\.?|versus|or)\s*
          \b(перв\w*|втор\w*|трет\w*|четв[её]рт\w*|пят\w*|first|second|third|fourth|fifth|[1-5])\b",
    )
    .expect("ordinal-vs-ordinal pattern")
});

static DETAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(
            как(?:ой|ая|ое|ие)|что|сколько|расскажи\w*|подробнее|
            цен\w*|стоимост\w*|час\w*\s+работы|режим\s+работы|открыт\w*|закрыт\w*|
            парковк\w*|меню|вай[-\s]?фай|wi[-\s]?fi|адрес\w*|рейтинг\w*|отзыв\w*|
            what|which|how\s+much|tell\s+me\s+more|
            price|hours|parking|menu|wifi|address|rating|reviews?
        )\b",
    )
    .expect("detail pattern")
});

/// Sub-classify a follow-up utterance. Comparison outranks detail because
/// comparatives routinely mention fact keywords ("which is cheaper").
pub fn follow_up_kind(text: &str) -> FollowUpKind {
    let lower = text.to_lowercase();
    if COMPARISON.is_match(&lower) || ORDINAL_VS_ORDINAL.is_match(&lower) {
        FollowUpKind::Comparison
    } else if DETAIL.is_match(&lower) {
        FollowUpKind::Detail
    } else {
        FollowUpKind::General
    }
}

static ROUTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:построй\w*|проложи\w*|составь\w*|сделай\w*|покажи\w*)\b.*\b(?:маршрут\w*|путь|дорог\w*)\b
        |\bмаршрут\w*\b.*\b(?:через|по|мимо)\b
        |\b(?:build|make|create|show|plot)\b.*\b(?:route|path)\b",
    )
    .expect("route pattern")
});

/// Explicit route/path-building request. Checked before everything else.
pub fn is_route_request(text: &str) -> bool {
    ROUTE.is_match(&text.to_lowercase())
}

static MULTI_PLACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \b\d+\s*(?:мест\w*|точ(?:ек|ки)|заведени\w*|places?|spots?)\b
        |\b(?:несколько|пар[ау]|few|couple\s+of|several)\s+(?:мест\w*|заведени\w*|places?|spots?)\b
        |\bчто\s+(?:здесь\s+)?(?:посмотреть|интересного)\b
        |\bкуда\s+сходить\b
        |\bwhat(?:'s|\s+is)?\s+(?:here\s+)?to\s+see\b
        |\bplaces\s+to\s+(?:see|visit)\b",
    )
    .expect("multi-place pattern")
});

/// Explicit multi-place request ("5 places", "what's here to see").
pub fn is_multi_place_request(text: &str) -> bool {
    MULTI_PLACE.is_match(&text.to_lowercase())
}

static COUNT_DIGIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s*(?:мест\w*|точ(?:ек|ки)|заведени\w*|places?|spots?)\b")
        .expect("count digit pattern")
});

static COUNT_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(дв[аеух]\w*|пар[ау]|тр[иёе]х?|четыре\w*|пят[иь]?\w*|two|couple|three|four|five)\b
          \s*(?:мест\w*|заведени\w*|places?|spots?)\b",
    )
    .expect("count word pattern")
});

/// Explicit requested place count, clamped to the routing waypoint range.
pub fn requested_count(text: &str) -> Option<usize> {
    let lower = text.to_lowercase();
    let raw = if let Some(caps) = COUNT_DIGIT.captures(&lower) {
        caps[1].parse::<usize>().ok()?
    } else if let Some(caps) = COUNT_WORD.captures(&lower) {
        match &caps[1] {
            w if w.starts_with("дв") || w.starts_with("пар") || w == "two" || w == "couple" => 2,
            w if w.starts_with("тр") || w == "three" => 3,
            w if w.starts_with("четыре") || w == "four" => 4,
            w if w.starts_with("пят") || w == "five" => 5,
            _ => return None,
        }
    } else {
        return None;
    };
    Some(raw.clamp(MIN_MULTI_PLACES, MAX_MULTI_PLACES))
}

static ORDINALS: Lazy<Vec<(Regex, usize)>> = Lazy::new(|| {
    let table = [
        (r"(?i)\b(?:перв\w*|first|1(?:-?(?:й|ый|ое|е|st))?)\b", 1),
        (r"(?i)\b(?:втор\w*|second|2(?:-?(?:й|ой|ое|е|nd))?)\b", 2),
        (r"(?i)\b(?:трет\w*|third|3(?:-?(?:й|ий|ье|е|rd))?)\b", 3),
        (r"(?i)\b(?:четв[её]рт\w*|fourth|4(?:-?(?:й|ый|ое|е|th))?)\b", 4),
        (r"(?i)\b(?:пят\w*|fifth|5(?:-?(?:й|ый|ое|е|th))?)\b", 5),
    ];
    table
        .iter()
        .map(|(pat, n)| (Regex::new(pat).expect("ordinal pattern"), *n))
        .collect()
});

/// First ordinal reference (word or digit, 1–5) in the text, 1-based.
pub fn extract_ordinal(text: &str) -> Option<usize> {
    let lower = text.to_lowercase();
    ORDINALS
        .iter()
        .filter_map(|(re, n)| re.find(&lower).map(|m| (m.start(), *n)))
        .min_by_key(|(start, _)| *start)
        .map(|(_, n)| n)
}

/// All ordinal references in textual order, deduplicated.
pub fn extract_all_ordinals(text: &str) -> Vec<usize> {
    let lower = text.to_lowercase();
    let mut hits: Vec<(usize, usize)> = Vec::new();
    for (re, n) in ORDINALS.iter() {
        for m in re.find_iter(&lower) {
            hits.push((m.start(), *n));
        }
    }
    hits.sort_by_key(|(start, _)| *start);
    let mut out = Vec::new();
    for (_, n) in hits {
        if !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

static PLACE_INDEX_LIST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:мест[ао]?|places?)\s+((?:[1-5][\s,]*(?:и|and)?\s*)+)")
        .expect("place index list pattern")
});

/// Parse explicit "places 1, 3 and 5" / "места 1, 3 и 5" style lists.
/// Deduplicated, ascending.
pub fn extract_place_indices(text: &str) -> Vec<usize> {
    let lower = text.to_lowercase();
    let Some(caps) = PLACE_INDEX_LIST.captures(&lower) else {
        return Vec::new();
    };
    let mut indices: Vec<usize> = caps[1]
        .chars()
        .filter_map(|c| c.to_digit(10))
        .map(|d| d as usize)
        .filter(|d| (1..=5).contains(d))
        .collect();
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Closed alias table checked before the generic prepositional patterns.
const CITY_ALIASES: &[(&str, &str)] = &[
    ("мск", "Москва"),
    ("москве", "Москва"),
    ("москвы", "Москва"),
    ("спб", "Санкт-Петербург"),
    ("питер", "Санкт-Петербург"),
    ("питере", "Санкт-Петербург"),
    ("екб", "Екатеринбург"),
    ("nyc", "New York"),
];

static CITY_PREPOSITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(?:в|во|around|in)\s+(?:городе\s+|city\s+of\s+)?([a-zа-яё][a-zа-яё-]{2,})\b",
    )
    .expect("city preposition pattern")
});

/// Words that follow "в"/"in" without naming a city.
const CITY_STOPWORDS: &[&str] = &[
    "центре", "центр", "городе", "районе", "этом", "каком", "котором", "пешей",
    "шаговой", "округе", "основном", "общем", "итоге", "the", "front", "fact",
    "order", "case", "general", "this", "that", "here", "there", "which",
];

/// Best-effort city mention. Alias table first (word-boundary match), then a
/// generic prepositional pattern with a stopword filter. The returned name is
/// capitalized; inflected Russian forms are left for the geocoder to resolve.
pub fn extract_city(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .collect();

    for (alias, canonical) in CITY_ALIASES {
        if words.iter().any(|w| w == alias) {
            return Some((*canonical).to_string());
        }
    }

    let caps = CITY_PREPOSITION.captures(&lower)?;
    let candidate = caps.get(1)?.as_str();
    if CITY_STOPWORDS.contains(&candidate) {
        return None;
    }
    let mut chars = candidate.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().collect::<String>() + chars.as_str())
}

static HIGH_URGENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(
            аптек\w*|больниц\w*|врач\w*|скорая|срочно|болит|травм\w*|
            банкомат\w*|обменник\w*|полици\w*|потерял\w*|украли|
            pharmacy|hospital|doctor|urgent|emergency|atm|police|stolen|lost\s+my
        )\b",
    )
    .expect("high urgency pattern")
});

static LOW_URGENCY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(
            погулять|посмотреть|интересн\w*|развлечь\w*|чем\s+заняться|достопримечательн\w*|
            explore|sightsee\w*|stroll|wander|walk\s+around|things\s+to\s+do
        )\b",
    )
    .expect("low urgency pattern")
});

/// Urgency tier carried into the grounding prompt: health/safety/financial
/// distress reads as high, exploratory phrasing as low, everything else medium.
pub fn urgency(text: &str) -> Urgency {
    let lower = text.to_lowercase();
    if HIGH_URGENCY.is_match(&lower) {
        Urgency::High
    } else if LOW_URGENCY.is_match(&lower) {
        Urgency::Low
    } else {
        Urgency::Medium
    }
}

static MIN_RATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)(?:рейтинг\w*\s*(?:выше|от|больше|не\s+ниже)|rating\s*(?:above|over|at\s+least))\s*([0-9](?:[.,][0-9])?)",
    )
    .expect("min rating pattern")
});

static GOOD_RATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:с\s+хорошим\s+рейтингом|хорош\w*|highly\s+rated|well[-\s]rated)\b")
        .expect("good rating pattern")
});

static OPEN_NOW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?ix)\b(?:открыт\w*\s+сейчас|сейчас\s+(?:открыт\w*|работа\w*)|open\s+now|открыт\w*)\b")
        .expect("open now pattern")
});

static CHEAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:дешев\w*|дешёв\w*|cheap\w*)\b").expect("cheap pattern"));

static BUDGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:недорог\w*|бюджетн\w*|inexpensive|affordable|budget)\b")
        .expect("budget pattern")
});

static SORT_DISTANCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:ближайш\w*|поближе|рядом|nearest|closest|nearby)\b")
        .expect("sort distance pattern")
});

static SORT_RATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:лучш\w*|сам\w+\s+хорош\w*|best|top[-\s]rated)\b")
        .expect("sort rating pattern")
});

/// Derive bounded result filters from the utterance. Sort preference order:
/// an explicit "cheapest" wins over "best" wins over proximity words, since
/// proximity words are the most common incidental phrasing.
pub fn extract_filters(text: &str) -> SearchFilters {
    let lower = text.to_lowercase();
    let mut filters = SearchFilters::default();

    if let Some(caps) = MIN_RATING.captures(&lower) {
        if let Ok(r) = caps[1].replace(',', ".").parse::<f64>() {
            filters.min_rating = Some(r);
        }
    } else if GOOD_RATING.is_match(&lower) {
        filters.min_rating = Some(4.0);
    }

    if CHEAP.is_match(&lower) {
        filters.max_price_level = Some(1);
        filters.sort_by = Some(SortBy::Price);
    } else if BUDGET.is_match(&lower) {
        filters.max_price_level = Some(2);
    }

    if OPEN_NOW.is_match(&lower) {
        filters.open_now = true;
    }

    if filters.sort_by.is_none() {
        if SORT_RATING.is_match(&lower) {
            filters.sort_by = Some(SortBy::Rating);
        } else if SORT_DISTANCE.is_match(&lower) {
            filters.sort_by = Some(SortBy::Distance);
        }
    }

    filters.clamped()
}
