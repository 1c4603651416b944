//! Client for the national ITS open API that lists road CCTV cameras and
//! their live HLS stream addresses.

use anyhow::{bail, Context, Result};
use log::*;
use serde::{Deserialize, Deserializer};

pub const DEFAULT_ENDPOINT: &str = "https://openapi.its.go.kr:9443/cctvInfo";

/// Road type and bounding box of the cameras to list.
#[derive(Debug, Clone, PartialEq)]
pub struct CctvQuery {
    /// `ex` for expressways, `its` for national roads.
    pub road_type: String,
    /// 1: live HLS, 2: static images, 3: live HTTP streams.
    pub cctv_type: u8,
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Default for CctvQuery {
    fn default() -> Self {
        CctvQuery {
            road_type: String::from("ex"),
            cctv_type: 1,
            min_x: 126.8,
            max_x: 127.89,
            min_y: 34.9,
            max_y: 35.1,
        }
    }
}

impl CctvQuery {
    pub fn params(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![
            ("apiKey", api_key.to_owned()),
            ("type", self.road_type.clone()),
            ("cctvType", self.cctv_type.to_string()),
            ("minX", self.min_x.to_string()),
            ("maxX", self.max_x.to_string()),
            ("minY", self.min_y.to_string()),
            ("maxY", self.max_y.to_string()),
            ("getType", String::from("json")),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CctvInfo {
    #[serde(rename = "cctvname", default)]
    pub name: String,
    #[serde(rename = "cctvurl")]
    pub url: String,
    #[serde(rename = "coordx", default, deserialize_with = "lenient_f64")]
    pub coord_x: Option<f64>,
    #[serde(rename = "coordy", default, deserialize_with = "lenient_f64")]
    pub coord_y: Option<f64>,
    #[serde(rename = "cctvformat", default)]
    pub format: Option<String>,
    #[serde(rename = "cctvresolution", default)]
    pub resolution: Option<String>,
    #[serde(rename = "roadsectionid", default)]
    pub road_section_id: Option<String>,
    #[serde(rename = "filecreatetime", default)]
    pub file_create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

/// Coordinates show up both as JSON numbers and as numeric strings.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        Some(NumberOrString::Number(v)) => Some(v),
        Some(NumberOrString::String(s)) => s.trim().parse().ok(),
        None => None,
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(match Option::<OneOrMany<T>>::deserialize(deserializer)? {
        Some(OneOrMany::Many(v)) => v,
        Some(OneOrMany::One(v)) => vec![v],
        None => Vec::new(),
    })
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(default, deserialize_with = "one_or_many")]
    data: Vec<CctvInfo>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    response: ResponseBody,
}

pub fn parse_response(body: &str) -> Result<Vec<CctvInfo>> {
    let envelope: Envelope =
        serde_json::from_str(body).context("unexpected CCTV API response")?;
    Ok(envelope.response.data)
}

pub struct CctvClient {
    endpoint: String,
    api_key: String,
    http: reqwest::blocking::Client,
}

impl CctvClient {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(CctvClient {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            http,
        })
    }

    pub fn fetch(&self, query: &CctvQuery) -> Result<Vec<CctvInfo>> {
        debug!("requesting CCTV list from {}: {:?}", self.endpoint, query);
        let response = self
            .http
            .get(&self.endpoint)
            .query(&query.params(&self.api_key))
            .send()
            .context("CCTV API request failed")?
            .error_for_status()?;
        let cameras = parse_response(&response.text()?)?;
        info!("CCTV API returned {} cameras", cameras.len());
        Ok(cameras)
    }

    /// Stream address of the camera at `index` in the query result.
    pub fn stream_uri(&self, query: &CctvQuery, index: usize) -> Result<CctvInfo> {
        let mut cameras = self.fetch(query)?;
        if index >= cameras.len() {
            bail!(
                "camera index {index} out of range ({} cameras found)",
                cameras.len()
            );
        }
        Ok(cameras.swap_remove(index))
    }
}
