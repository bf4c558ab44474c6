//! Abbreviations used in the location line of a label.

const COUNTRIES: &[(&str, &str)] = &[
    ("united states", "USA"),
    ("united states of america", "USA"),
    ("usa", "USA"),
    ("us", "USA"),
    ("canada", "CAN"),
    ("mexico", "MEX"),
];

const STATES: &[(&str, &str)] = &[
    ("oregon", "OR"),
    ("washington", "WA"),
    ("idaho", "ID"),
    ("california", "CA"),
    ("nevada", "NV"),
    ("montana", "MT"),
    ("british columbia", "BC"),
];

const OREGON_COUNTIES: &[(&str, &str)] = &[
    ("baker", "Baker"),
    ("benton", "Bent"),
    ("clackamas", "Clack"),
    ("clatsop", "Clats"),
    ("columbia", "Colum"),
    ("coos", "Coos"),
    ("crook", "Crook"),
    ("curry", "Curry"),
    ("deschutes", "Desch"),
    ("douglas", "Doug"),
    ("gilliam", "Gill"),
    ("grant", "Grant"),
    ("harney", "Harn"),
    ("hood river", "HoodR"),
    ("jackson", "Jack"),
    ("jefferson", "Jeff"),
    ("josephine", "Jose"),
    ("klamath", "Klam"),
    ("lake", "Lake"),
    ("lane", "Lane"),
    ("lincoln", "Linc"),
    ("linn", "Linn"),
    ("malheur", "Malh"),
    ("marion", "Mari"),
    ("morrow", "Morr"),
    ("multnomah", "Mult"),
    ("polk", "Polk"),
    ("sherman", "Sher"),
    ("tillamook", "Till"),
    ("umatilla", "Umat"),
    ("union", "Union"),
    ("wallowa", "Wall"),
    ("wasco", "Wasco"),
    ("washington", "Wash"),
    ("wheeler", "Whee"),
    ("yamhill", "Yamh"),
];

// Unlisted names longer than this are cut with a trailing period
const MAX_PLAIN_LEN: usize = 6;

fn lookup(table: &[(&str, &'static str)], value: &str) -> Option<&'static str> {
    let key = value.trim().to_lowercase();
    table.iter().find(|(name, _)| *name == key).map(|(_, abbr)| *abbr)
}

pub fn country(value: &str) -> String {
    lookup(COUNTRIES, value)
        .map(str::to_string)
        .unwrap_or_else(|| value.trim().to_string())
}

pub fn state(value: &str) -> String {
    lookup(STATES, value)
        .map(str::to_string)
        .unwrap_or_else(|| value.trim().to_string())
}

/// County abbreviation; Oregon counties have fixed forms, others are shortened
pub fn county(state_name: &str, value: &str) -> String {
    let value = value.trim();
    if state(state_name) == "OR" {
        if let Some(abbr) = lookup(OREGON_COUNTIES, value) {
            return abbr.to_string();
        }
    }
    if value.chars().count() <= MAX_PLAIN_LEN {
        value.to_string()
    } else {
        let cut: String = value.chars().take(4).collect();
        format!("{}.", cut.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abbreviations() {
        assert_eq!(country("United States"), "USA");
        assert_eq!(country("Peru"), "Peru");
        assert_eq!(state("Oregon"), "OR");
        assert_eq!(state("OR"), "OR");
        assert_eq!(county("Oregon", "Benton"), "Bent");
        assert_eq!(county("Oregon", "hood river"), "HoodR");
        assert_eq!(county("Washington", "Whatcom"), "What.");
        assert_eq!(county("Washington", "King"), "King");
    }
}
