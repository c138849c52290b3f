use serde::Deserialize;

/// Identification sent with every download and counting request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    pub addon_name: String,
    pub addon_version: String,
    pub application: String,
    pub application_version: String,
    pub platform: String,
    pub platform_version: String,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            addon_name: "filtersync".to_string(),
            addon_version: env!("CARGO_PKG_VERSION").to_string(),
            application: String::new(),
            application_version: "0".to_string(),
            platform: "android".to_string(),
            platform_version: "0".to_string(),
        }
    }
}

impl AppInfo {
    /// Appends the identification parameters shared by all request kinds.
    pub fn append_query(&self, url: &mut url::Url) {
        url.query_pairs_mut()
            .append_pair("addonName", &self.addon_name)
            .append_pair("addonVersion", &self.addon_version)
            .append_pair("application", &self.application)
            .append_pair("applicationVersion", &self.application_version)
            .append_pair("platform", &self.platform)
            .append_pair("platformVersion", &self.platform_version);
    }
}
