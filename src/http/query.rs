//! Query string parsing

use std::collections::HashMap;

/// Decoded query parameters. When a name repeats, the first value wins.
#[derive(Debug, Default, Clone)]
pub struct QueryParams {
    params: HashMap<String, String>,
}

impl QueryParams {
    pub fn parse(query: Option<&str>) -> Self {
        let mut params = HashMap::new();
        if let Some(query) = query {
            for (name, value) in form_urlencoded::parse(query.as_bytes()) {
                params
                    .entry(name.into_owned())
                    .or_insert_with(|| value.into_owned());
            }
        }
        Self { params }
    }

    /// Value of a parameter. Present-but-empty values (`?uploadId=`) count
    /// as missing.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }
}
