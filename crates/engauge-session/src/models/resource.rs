use std::fmt;
use std::str::FromStr;

/// Resources served under `/dashboard/<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Summaries,
    Endpoint,
    Origin,
    Entity,
    Properties,
    Settings,
}

impl Resource {
    pub const ALL: [Resource; 6] = [
        Resource::Summaries,
        Resource::Endpoint,
        Resource::Origin,
        Resource::Entity,
        Resource::Properties,
        Resource::Settings,
    ];

    /// Path segment used by the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Summaries => "summaries",
            Resource::Endpoint => "endpoint",
            Resource::Origin => "origin",
            Resource::Entity => "entity",
            Resource::Properties => "properties",
            Resource::Settings => "settings",
        }
    }

    /// Singleton resources live at a fixed path; record ids are ignored.
    pub fn is_singleton(&self) -> bool {
        matches!(self, Resource::Settings)
    }

    /// Whether a raw resource name refers to a singleton.
    pub fn is_singleton_name(name: &str) -> bool {
        name.parse::<Resource>()
            .map(|r| r.is_singleton())
            .unwrap_or(false)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown resource: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_from_str() {
        assert_eq!("endpoint".parse::<Resource>(), Ok(Resource::Endpoint));
        assert_eq!("settings".parse::<Resource>(), Ok(Resource::Settings));
        assert!("endpoints".parse::<Resource>().is_err());
        assert!("Settings".parse::<Resource>().is_err());
    }

    #[test]
    fn test_only_settings_is_singleton() {
        for resource in Resource::ALL {
            assert_eq!(resource.is_singleton(), resource == Resource::Settings);
        }
        assert!(Resource::is_singleton_name("settings"));
        assert!(!Resource::is_singleton_name("endpoint"));
        assert!(!Resource::is_singleton_name("unknown"));
    }
}
