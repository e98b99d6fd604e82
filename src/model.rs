use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jurisdiction {
    National,
    Bj,
    Tj,
    He,
    Sx,
    Nm,
    Ln,
    Jl,
    Hl,
    Sh,
    Js,
    Zj,
    Ah,
    Fj,
    Jx,
    Sd,
    Ha,
    Hb,
    Hn,
    Gd,
    Gx,
    Hi,
    Cq,
    Sc,
    Gz,
    Yn,
    Xz,
    Sn,
    Gs,
    Qh,
    Nx,
    Xj,
}

struct JurisdictionInfo {
    jurisdiction: Jurisdiction,
    code: &'static str,
    name_zh: &'static str,
    name_en: &'static str,
    gov_host: &'static str,
}

const JURISDICTIONS: &[JurisdictionInfo] = &[
    JurisdictionInfo {
        jurisdiction: Jurisdiction::National,
        code: "national",
        name_zh: "国家",
        name_en: "National",
        gov_host: "www.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Bj,
        code: "bj",
        name_zh: "北京",
        name_en: "Beijing",
        gov_host: "beijing.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Tj,
        code: "tj",
        name_zh: "天津",
        name_en: "Tianjin",
        gov_host: "tj.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::He,
        code: "he",
        name_zh: "河北",
        name_en: "Hebei",
        gov_host: "hebei.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Sx,
        code: "sx",
        name_zh: "山西",
        name_en: "Shanxi",
        gov_host: "shanxi.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Nm,
        code: "nm",
        name_zh: "内蒙古",
        name_en: "Inner Mongolia",
        gov_host: "nmg.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Ln,
        code: "ln",
        name_zh: "辽宁",
        name_en: "Liaoning",
        gov_host: "ln.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Jl,
        code: "jl",
        name_zh: "吉林",
        name_en: "Jilin",
        gov_host: "jl.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Hl,
        code: "hl",
        name_zh: "黑龙江",
        name_en: "Heilongjiang",
        gov_host: "hlj.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Sh,
        code: "sh",
        name_zh: "上海",
        name_en: "Shanghai",
        gov_host: "sh.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Js,
        code: "js",
        name_zh: "江苏",
        name_en: "Jiangsu",
        gov_host: "jiangsu.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Zj,
        code: "zj",
        name_zh: "浙江",
        name_en: "Zhejiang",
        gov_host: "zj.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Ah,
        code: "ah",
        name_zh: "安徽",
        name_en: "Anhui",
        gov_host: "ah.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Fj,
        code: "fj",
        name_zh: "福建",
        name_en: "Fujian",
        gov_host: "fujian.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Jx,
        code: "jx",
        name_zh: "江西",
        name_en: "Jiangxi",
        gov_host: "jiangxi.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Sd,
        code: "sd",
        name_zh: "山东",
        name_en: "Shandong",
        gov_host: "shandong.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Ha,
        code: "ha",
        name_zh: "河南",
        name_en: "Henan",
        gov_host: "henan.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Hb,
        code: "hb",
        name_zh: "湖北",
        name_en: "Hubei",
        gov_host: "hubei.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Hn,
        code: "hn",
        name_zh: "湖南",
        name_en: "Hunan",
        gov_host: "hunan.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Gd,
        code: "gd",
        name_zh: "广东",
        name_en: "Guangdong",
        gov_host: "gd.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Gx,
        code: "gx",
        name_zh: "广西",
        name_en: "Guangxi",
        gov_host: "gxzf.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Hi,
        code: "hi",
        name_zh: "海南",
        name_en: "Hainan",
        gov_host: "hainan.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Cq,
        code: "cq",
        name_zh: "重庆",
        name_en: "Chongqing",
        gov_host: "cq.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Sc,
        code: "sc",
        name_zh: "四川",
        name_en: "Sichuan",
        gov_host: "sc.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Gz,
        code: "gz",
        name_zh: "贵州",
        name_en: "Guizhou",
        gov_host: "guizhou.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Yn,
        code: "yn",
        name_zh: "云南",
        name_en: "Yunnan",
        gov_host: "yn.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Xz,
        code: "xz",
        name_zh: "西藏",
        name_en: "Tibet",
        gov_host: "xizang.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Sn,
        code: "sn",
        name_zh: "陕西",
        name_en: "Shaanxi",
        gov_host: "shaanxi.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Gs,
        code: "gs",
        name_zh: "甘肃",
        name_en: "Gansu",
        gov_host: "gansu.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Qh,
        code: "qh",
        name_zh: "青海",
        name_en: "Qinghai",
        gov_host: "qinghai.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Nx,
        code: "nx",
        name_zh: "宁夏",
        name_en: "Ningxia",
        gov_host: "nx.gov.cn",
    },
    JurisdictionInfo {
        jurisdiction: Jurisdiction::Xj,
        code: "xj",
        name_zh: "新疆",
        name_en: "Xinjiang",
        gov_host: "xinjiang.gov.cn",
    },
];

impl Jurisdiction {
    fn info(self) -> &'static JurisdictionInfo {
        JURISDICTIONS
            .iter()
            .find(|entry| entry.jurisdiction == self)
            .unwrap_or(&JURISDICTIONS[0])
    }

    pub fn code(self) -> &'static str {
        self.info().code
    }

    pub fn display_name(self, language: Language) -> &'static str {
        match language {
            Language::Zh => self.info().name_zh,
            Language::En => self.info().name_en,
        }
    }

    pub fn gov_host(self) -> &'static str {
        self.info().gov_host
    }
}

impl FromStr for Jurisdiction {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().to_ascii_lowercase();
        JURISDICTIONS
            .iter()
            .find(|entry| entry.code == lowered || entry.name_zh == value.trim())
            .map(|entry| entry.jurisdiction)
            .ok_or_else(|| ValidationError::UnknownJurisdiction(value.trim().to_string()))
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Solar,
    Wind,
    Storage,
    Hydro,
    Thermal,
    Grid,
}

impl AssetCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Solar => "solar",
            Self::Wind => "wind",
            Self::Storage => "storage",
            Self::Hydro => "hydro",
            Self::Thermal => "thermal",
            Self::Grid => "grid",
        }
    }

    pub fn display_name(self, language: Language) -> &'static str {
        match (self, language) {
            (Self::Solar, Language::Zh) => "光伏",
            (Self::Wind, Language::Zh) => "风电",
            (Self::Storage, Language::Zh) => "储能",
            (Self::Hydro, Language::Zh) => "水电",
            (Self::Thermal, Language::Zh) => "火电",
            (Self::Grid, Language::Zh) => "电网",
            (Self::Solar, Language::En) => "solar PV",
            (Self::Wind, Language::En) => "wind power",
            (Self::Storage, Language::En) => "energy storage",
            (Self::Hydro, Language::En) => "hydropower",
            (Self::Thermal, Language::En) => "thermal power",
            (Self::Grid, Language::En) => "power grid",
        }
    }
}

impl FromStr for AssetCategory {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "solar" | "pv" | "光伏" => Ok(Self::Solar),
            "wind" | "风电" => Ok(Self::Wind),
            "storage" | "energy_storage" | "储能" => Ok(Self::Storage),
            "hydro" | "水电" => Ok(Self::Hydro),
            "thermal" | "火电" => Ok(Self::Thermal),
            "grid" | "电网" => Ok(Self::Grid),
            _ => Err(ValidationError::UnknownAssetCategory(
                value.trim().to_string(),
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    #[default]
    All,
    Policy,
    Standard,
    GridConnection,
    Permitting,
    Pricing,
}

impl DocumentCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Policy => "policy",
            Self::Standard => "standard",
            Self::GridConnection => "grid_connection",
            Self::Permitting => "permitting",
            Self::Pricing => "pricing",
        }
    }

    pub fn filter_value(self) -> Option<&'static str> {
        match self {
            Self::All => None,
            other => Some(other.as_str()),
        }
    }
}

impl FromStr for DocumentCategory {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "all" => Ok(Self::All),
            "policy" => Ok(Self::Policy),
            "standard" => Ok(Self::Standard),
            "grid_connection" => Ok(Self::GridConnection),
            "permitting" => Ok(Self::Permitting),
            "pricing" => Ok(Self::Pricing),
            _ => Err(ValidationError::UnknownDocumentCategory(
                value.trim().to_string(),
            )),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

impl FromStr for Language {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "zh" | "zh-cn" | "zh_cn" => Ok(Self::Zh),
            "en" | "en-us" | "en_us" => Ok(Self::En),
            _ => Err(ValidationError::UnknownLanguage(value.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    question: String,
    jurisdiction: Option<Jurisdiction>,
    asset_category: Option<AssetCategory>,
    document_category: DocumentCategory,
    language: Language,
}

impl Query {
    pub fn new(
        question: String,
        jurisdiction: Option<Jurisdiction>,
        asset_category: Option<AssetCategory>,
        document_category: DocumentCategory,
        language: Language,
    ) -> Self {
        Self {
            question,
            jurisdiction,
            asset_category,
            document_category,
            language,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn jurisdiction(&self) -> Option<Jurisdiction> {
        self.jurisdiction
    }

    pub fn asset_category(&self) -> Option<AssetCategory> {
        self.asset_category
    }

    pub fn document_category(&self) -> DocumentCategory {
        self.document_category
    }

    pub fn language(&self) -> Language {
        self.language
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub text: String,
    pub source_url: String,
    #[serde(default)]
    pub source_title: String,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
    #[serde(default)]
    pub jurisdiction: String,
    #[serde(default)]
    pub asset_category: String,
    #[serde(default)]
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Citation {
    pub title: String,
    pub url: String,
    pub effective_date: Option<NaiveDate>,
    pub quote: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendName {
    VectorSearch,
    DocumentDiscovery,
    WebQa,
}

impl BackendName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VectorSearch => "vector_search",
            Self::DocumentDiscovery => "document_discovery",
            Self::WebQa => "web_qa",
        }
    }

    pub fn answer_mode(self) -> AnswerMode {
        match self {
            Self::VectorSearch => AnswerMode::VectorRag,
            Self::DocumentDiscovery => AnswerMode::DiscoveryQa,
            Self::WebQa => AnswerMode::WebQa,
        }
    }
}

impl fmt::Display for BackendName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Empty,
    Error,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalAttempt {
    pub backend: BackendName,
    pub status: AttemptStatus,
    pub chunks: Vec<RetrievedChunk>,
    pub elapsed_ms: u64,
    pub retries: u32,
    pub dropped_untrusted: usize,
    pub error: Option<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    VectorRag,
    DiscoveryQa,
    WebQa,
    Refusal,
}

impl AnswerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VectorRag => "vector_rag",
            Self::DiscoveryQa => "discovery_qa",
            Self::WebQa => "web_qa",
            Self::Refusal => "refusal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComposedAnswer {
    pub mode: AnswerMode,
    pub body: String,
    pub citations: Vec<Citation>,
    pub guidance_tips: Vec<String>,
    pub trace_id: String,
}

impl ComposedAnswer {
    pub fn is_refusal(&self) -> bool {
        self.mode == AnswerMode::Refusal
    }
}
