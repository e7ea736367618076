/// Localized strings for AI-Chat2.
/// Locale comes from the `locale` config key (`zh` by default).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    Zh,
    En,
}

impl Locale {
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "en" | "en-us" | "en_us" | "en-gb" | "en_gb" => Self::En,
            _ => Self::Zh,
        }
    }

    pub fn messages(self) -> &'static Messages {
        match self {
            Locale::En => &EN,
            Locale::Zh => &ZH,
        }
    }
}

pub struct Messages {
    pub run_started: &'static str,
    pub run_finished: &'static str,
    pub file_started: &'static str,
    pub file_finished: &'static str,
    pub error_prefix: &'static str,
    pub update_label: &'static str,
    pub version_download_failed: &'static str,
    pub version_read_failed: &'static str,
    pub update_check_failed: &'static str,
    pub fallback_failed: &'static str,
    pub missing_body: &'static str,
    pub missing_fields: &'static str,
    pub api_not_configured: &'static str,
    pub auth_failed: &'static str,
    pub rate_limited: &'static str,
    pub api_failed: &'static str,
    pub generic_failed: &'static str,
    pub default_title: &'static str,
}

pub static EN: Messages = Messages {
    run_started: "download started",
    run_finished: "download finished or cancelled",
    file_started: "started",
    file_finished: "finished",
    error_prefix: "Error",
    update_label: "Update check",
    version_download_failed: "Could not download the version file",
    version_read_failed: "Could not read the version file",
    update_check_failed: "Update check failed",
    fallback_failed: "Fallback also failed",
    missing_body: "Missing message data",
    missing_fields: "Missing conversation id or message",
    api_not_configured: "Please configure the API key and base URL first",
    auth_failed: "API authentication failed, check the API key",
    rate_limited: "API rate limit reached, try again later",
    api_failed: "API call failed",
    generic_failed: "An error occurred",
    default_title: "New chat 1",
};

pub static ZH: Messages = Messages {
    run_started: "开始下载",
    run_finished: "下载完成或已被取消",
    file_started: "开始下载",
    file_finished: "下载完成",
    error_prefix: "错误",
    update_label: "检查更新",
    version_download_failed: "无法下载版本文件",
    version_read_failed: "无法读取版本文件",
    update_check_failed: "检查更新失败",
    fallback_failed: "备用方法也失败",
    missing_body: "缺少消息数据",
    missing_fields: "缺少对话ID或消息内容",
    api_not_configured: "请先配置API密钥和地址",
    auth_failed: "API认证失败，请检查API密钥",
    rate_limited: "API速率限制，请稍后再试",
    api_failed: "API调用失败",
    generic_failed: "发生错误",
    default_title: "新对话 1",
};
