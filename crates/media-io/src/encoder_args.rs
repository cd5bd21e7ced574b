use serde::Serialize;
use std::ffi::OsString;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Crop rectangle in source pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// GPU vendor classification supplied by an external detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HwVendor {
    /// Integrated GPU with a native hardware crop (Quick Sync).
    Intel,
    Nvidia,
    Amd,
}

impl HwVendor {
    /// Discrete vendors lack a hardware crop filter; frames are round-tripped through host memory.
    pub fn is_discrete(self) -> bool {
        matches!(self, HwVendor::Nvidia | HwVendor::Amd)
    }

    fn input_args(self) -> [&'static str; 4] {
        match self {
            HwVendor::Intel => ["-hwaccel", "qsv", "-hwaccel_output_format", "qsv"],
            HwVendor::Nvidia => ["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"],
            HwVendor::Amd => ["-hwaccel", "d3d11va", "-hwaccel_output_format", "d3d11"],
        }
    }

    fn upload_filter(self) -> &'static str {
        match self {
            HwVendor::Nvidia => "hwupload_cuda",
            _ => "hwupload",
        }
    }
}

impl fmt::Display for HwVendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HwVendor::Intel => "intel",
            HwVendor::Nvidia => "nvidia",
            HwVendor::Amd => "amd",
        };
        f.write_str(name)
    }
}

impl FromStr for HwVendor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "intel" | "qsv" => Ok(HwVendor::Intel),
            "nvidia" | "cuda" | "nvenc" => Ok(HwVendor::Nvidia),
            "amd" | "amf" => Ok(HwVendor::Amd),
            other => Err(format!("unknown hardware vendor: {other}")),
        }
    }
}

/// Quality knobs applied to whichever video encoder the vendor selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub quality: u8,
    pub preset: String,
    pub audio_codec: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            quality: 18,
            preset: "slow".to_string(),
            audio_codec: "copy".to_string(),
        }
    }
}

/// Filter-graph expression for the crop, adjusted to where frames live for `vendor`.
pub fn build_filter(crop: &CropRect, vendor: Option<HwVendor>) -> String {
    let CropRect {
        x,
        y,
        width,
        height,
    } = *crop;
    let software = format!("crop={width}:{height}:{x}:{y}");
    match vendor {
        None => software,
        Some(HwVendor::Intel) => format!("vpp_qsv=cw={width}:ch={height}:cx={x}:cy={y}"),
        Some(v) => format!("hwdownload,format=nv12,{software},{}", v.upload_filter()),
    }
}

fn video_codec_args(vendor: Option<HwVendor>, settings: &EncoderSettings) -> Vec<String> {
    let q = settings.quality.to_string();
    let args: Vec<&str> = match vendor {
        None => vec!["-c:v", "libx265", "-crf", q.as_str(), "-preset", settings.preset.as_str()],
        Some(HwVendor::Intel) => vec![
            "-c:v",
            "hevc_qsv",
            "-global_quality",
            q.as_str(),
            "-preset",
            settings.preset.as_str(),
        ],
        Some(HwVendor::Nvidia) => vec![
            "-c:v",
            "hevc_nvenc",
            "-rc",
            "vbr",
            "-cq",
            q.as_str(),
            "-preset",
            "p6",
        ],
        Some(HwVendor::Amd) => vec![
            "-c:v", "hevc_amf", "-rc", "cqp", "-qp_i", q.as_str(), "-qp_p", q.as_str(), "-quality", "quality",
        ],
    };
    args.into_iter().map(String::from).collect()
}

/// Full argument list for one crop run (everything after the executable).
pub fn build_encoder_args(
    source: &Path,
    crop: &CropRect,
    vendor: Option<HwVendor>,
    settings: &EncoderSettings,
    destination: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into()];
    if let Some(v) = vendor {
        args.extend(v.input_args().into_iter().map(OsString::from));
    }
    args.push("-i".into());
    args.push(source.as_os_str().to_owned());
    args.push("-vf".into());
    args.push(build_filter(crop, vendor).into());
    args.extend(video_codec_args(vendor, settings).into_iter().map(OsString::from));
    args.push("-c:a".into());
    args.push(settings.audio_codec.clone().into());
    args.push(destination.as_os_str().to_owned());
    args
}
