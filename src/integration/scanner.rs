// ==========================================
// 货柜流转系统 - 扫描件处理与码识别
// ==========================================
// 职责: 拆页、裁边、栅格化、DataMatrix 识别
// 说明: 图像处理交给外部命令（如 ImageMagick / dmtxread），
//       本模块只负责调用约定与结果收集
// ==========================================

use crate::integration::error::{IntegrationError, IntegrationResult};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command as Process;

/// 识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOutput {
    pub text: String,
    pub is_error: bool,
}

impl DecodeOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: message.into(),
            is_error: true,
        }
    }
}

/// 码识别器
pub trait CodeDecoder: Send + Sync {
    fn decode(&self, image: &Path) -> IntegrationResult<DecodeOutput>;
}

/// 扫描件处理工具
pub trait DocumentToolkit: Send + Sync {
    /// 拆页: 一页一个文件，按页序返回
    fn split(&self, source: &Path, work_dir: &Path) -> IntegrationResult<Vec<PathBuf>>;

    /// 裁掉空白边，返回裁剪后的文件
    fn crop(&self, page: &Path) -> IntegrationResult<PathBuf>;

    /// 转为位图，返回图片文件
    fn rasterize(&self, page: &Path) -> IntegrationResult<PathBuf>;
}

// ==========================================
// 外部命令调用
// ==========================================
// 参数模板中的 {input} / {output} 会被替换
fn run_template(template: &[String], input: &Path, output: &Path) -> IntegrationResult<std::process::Output> {
    let (program, args) = template
        .split_first()
        .ok_or_else(|| IntegrationError::InvalidData("外部命令模板为空".to_string()))?;

    let args: Vec<String> = args
        .iter()
        .map(|arg| {
            arg.replace("{input}", &input.to_string_lossy())
                .replace("{output}", &output.to_string_lossy())
        })
        .collect();

    let out = Process::new(program)
        .args(&args)
        .output()
        .map_err(|e| IntegrationError::Unavailable {
            service: program.clone(),
            message: e.to_string(),
        })?;
    Ok(out)
}

/// 识别器约定的旁路文本跟随文件走
fn carry_sidecar(from: &Path, to: &Path) -> IntegrationResult<()> {
    let sidecar = PathBuf::from(format!("{}.txt", from.display()));
    if sidecar.is_file() {
        fs::copy(&sidecar, format!("{}.txt", to.display()))?;
    }
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str, extension: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}.{}", stem, suffix, extension))
}

// ==========================================
// FileDocumentToolkit
// ==========================================
/// 基于文件的扫描件处理
///
/// - 目录视为已拆好的多页扫描件（文件名排序即页序）
/// - 单个文件视为单页
/// - 裁边、栅格化未配置命令时原样返回
#[derive(Debug, Clone, Default)]
pub struct FileDocumentToolkit {
    pub crop_command: Option<Vec<String>>,
    pub rasterize_command: Option<Vec<String>>,
}

const RASTER_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

impl FileDocumentToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_raster(path: &Path) -> bool {
        path.extension()
            .map(|ext| {
                let ext = ext.to_string_lossy().to_lowercase();
                RASTER_EXTENSIONS.contains(&ext.as_str())
            })
            .unwrap_or(false)
    }
}

impl DocumentToolkit for FileDocumentToolkit {
    fn split(&self, source: &Path, work_dir: &Path) -> IntegrationResult<Vec<PathBuf>> {
        fs::create_dir_all(work_dir)?;

        let mut inputs: Vec<PathBuf> = if source.is_dir() {
            fs::read_dir(source)?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .filter(|p| p.extension().map(|e| e != "txt").unwrap_or(true))
                .collect()
        } else {
            vec![source.to_path_buf()]
        };
        inputs.sort();

        let mut pages = Vec::with_capacity(inputs.len());
        for (idx, input) in inputs.iter().enumerate() {
            let ext = input
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_else(|| "bin".to_string());
            let page = work_dir.join(format!("page-{:03}.{}", idx + 1, ext));
            fs::copy(input, &page)?;
            carry_sidecar(input, &page)?;
            pages.push(page);
        }
        Ok(pages)
    }

    fn crop(&self, page: &Path) -> IntegrationResult<PathBuf> {
        let Some(template) = &self.crop_command else {
            return Ok(page.to_path_buf());
        };
        let ext = page
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_else(|| "png".to_string());
        let output = with_suffix(page, "-crop", &ext);
        let out = run_template(template, page, &output)?;
        if !out.status.success() || !output.is_file() {
            return Err(IntegrationError::Rejected(format!(
                "裁边失败: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        carry_sidecar(page, &output)?;
        Ok(output)
    }

    fn rasterize(&self, page: &Path) -> IntegrationResult<PathBuf> {
        if Self::is_raster(page) {
            return Ok(page.to_path_buf());
        }
        let Some(template) = &self.rasterize_command else {
            return Ok(page.to_path_buf());
        };
        let output = with_suffix(page, "", "png");
        let out = run_template(template, page, &output)?;
        if !out.status.success() || !output.is_file() {
            return Err(IntegrationError::Rejected(format!(
                "栅格化失败: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            )));
        }
        carry_sidecar(page, &output)?;
        Ok(output)
    }
}

// ==========================================
// SidecarDecoder - 读取旁路文本
// ==========================================
/// 读取 `<图片>.txt` 中的识别结果（外部批量识别后落盘）
#[derive(Debug, Clone, Default)]
pub struct SidecarDecoder;

impl CodeDecoder for SidecarDecoder {
    fn decode(&self, image: &Path) -> IntegrationResult<DecodeOutput> {
        let sidecar = PathBuf::from(format!("{}.txt", image.display()));
        if !sidecar.is_file() {
            return Ok(DecodeOutput::error("未找到识别结果"));
        }
        let text = fs::read_to_string(&sidecar)?;
        let text = text.trim();
        if text.is_empty() {
            Ok(DecodeOutput::error("识别结果为空"))
        } else {
            Ok(DecodeOutput::ok(text))
        }
    }
}

// ==========================================
// CommandDecoder - 调用外部识别程序
// ==========================================
/// 例如 `["dmtxread", "-n", "{input}"]`，标准输出为码内容
#[derive(Debug, Clone)]
pub struct CommandDecoder {
    template: Vec<String>,
}

impl CommandDecoder {
    pub fn new(template: Vec<String>) -> Self {
        Self { template }
    }
}

impl CodeDecoder for CommandDecoder {
    fn decode(&self, image: &Path) -> IntegrationResult<DecodeOutput> {
        let out = run_template(&self.template, image, image)?;
        let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !out.status.success() || text.is_empty() {
            return Ok(DecodeOutput::error(
                String::from_utf8_lossy(&out.stderr).trim().to_string(),
            ));
        }
        Ok(DecodeOutput::ok(text))
    }
}
