//! Extract lookup by name.

use common_error::{AnserError, AnserResult};

use crate::catalog::Extract;

/// Resolve a text query against the catalog.
///
/// File names match first (they are unique); short names may be ambiguous.
/// Underscores and spaces are interchangeable and matching ignores case.
pub fn find_extract_by_query(extracts: &[Extract], query: &str) -> AnserResult<Extract> {
    let needle = normalize(query);

    let file_name_matches: Vec<&Extract> = extracts
        .iter()
        .filter(|extract| normalize(&extract.file_name) == needle)
        .collect();
    if file_name_matches.len() == 1 {
        return Ok(file_name_matches[0].clone());
    }

    let name_matches: Vec<&Extract> = extracts
        .iter()
        .filter(|extract| normalize(&extract.name) == needle)
        .collect();
    match name_matches.len() {
        1 => Ok(name_matches[0].clone()),
        0 => {
            let mut suggestions: Vec<String> = extracts
                .iter()
                .filter(|extract| {
                    let name = normalize(&extract.name);
                    name.contains(&needle) || needle.contains(&name)
                })
                .map(|extract| extract.file_name.clone())
                .collect();
            suggestions.sort();
            suggestions.truncate(5);
            Err(AnserError::ExtractNotFound {
                query: query.trim().to_string(),
                suggestions,
            })
        }
        _ => {
            let mut matches: Vec<String> = name_matches
                .iter()
                .map(|extract| extract.file_name.clone())
                .collect();
            matches.sort();
            Err(AnserError::ExtractAmbiguous {
                query: query.trim().to_string(),
                matches,
            })
        }
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase().replace('_', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::MultiPolygon;

    fn extract(name: &str, file_name: &str) -> Extract {
        Extract {
            id: file_name.to_string(),
            name: name.to_string(),
            file_name: file_name.to_string(),
            parent: None,
            url: String::new(),
            geometry: MultiPolygon(vec![]),
            area_km2: 0.0,
        }
    }

    fn sample() -> Vec<Extract> {
        vec![
            extract("Monaco", "geofabrik_europe_monaco"),
            extract("Monaco", "bbbike_Monaco"),
            extract("Montenegro", "geofabrik_europe_montenegro"),
        ]
    }

    #[test]
    fn test_unique_file_name_match() {
        let found = find_extract_by_query(&sample(), "geofabrik_europe_monaco").unwrap();
        assert_eq!(found.file_name, "geofabrik_europe_monaco");
    }

    #[test]
    fn test_ambiguous_name() {
        let err = find_extract_by_query(&sample(), "monaco").unwrap_err();
        let AnserError::ExtractAmbiguous { matches, .. } = err else {
            panic!("expected ExtractAmbiguous");
        };
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_zero_matches_with_suggestions() {
        let err = find_extract_by_query(&sample(), "monte").unwrap_err();
        let AnserError::ExtractNotFound { suggestions, .. } = err else {
            panic!("expected ExtractNotFound");
        };
        assert!(suggestions.is_empty() || suggestions[0].contains("montenegro"));
    }

    #[test]
    fn test_underscores_and_case_fold() {
        let catalog = vec![extract("New York", "bbbike_NewYork")];
        assert!(find_extract_by_query(&catalog, "new york").is_ok());
    }
}
