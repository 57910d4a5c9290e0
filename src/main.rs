//! frame_pipeline - 帧管线演示程序
//!
//! 每帧清屏并绘制一个矩形，按配置选择同步模型与图形后端。
//!
//! # 使用方法
//!
//! ```bash
//! # 软件设备，无窗口渲染 120 帧
//! cargo run -- --software --frames 120
//!
//! # DirectX 12 窗口（仅 Windows），按缓冲 fence 同步
//! cargo run -- --dx12 --pipelined
//! ```
//!
//! # 命令行参数
//!
//! - `--dx12` / `--software`: 选择后端
//! - `--pipelined`: 使用按缓冲的 fence 同步
//! - `--frames <n>`: 渲染 n 帧后退出
//! - `--width <value>` / `--height <value>`: 窗口尺寸
//! - `--adapter <name>`: 适配器选择策略

use std::sync::Arc;

use anyhow::{Context, Result};
use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use tracing::{debug, error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::WindowBuilder;

use frame_pipeline::core::config::{arg_value, Config, GraphicsBackend};
use frame_pipeline::core::error::GpuResult;
use frame_pipeline::core::log;
use frame_pipeline::gfx::backend::GpuDevice;
use frame_pipeline::gfx::software::SoftwareDevice;
use frame_pipeline::renderer::quad::QuadScene;
use frame_pipeline::renderer::swapchain::SwapChainDesc;
use frame_pipeline::renderer::{ContextOptions, FrameReport, FrameSynchronizer, GpuContext};

/// 软件后端未指定 `--frames` 时渲染的帧数
const DEFAULT_HEADLESS_FRAMES: u64 = 120;

fn main() {
    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("config.toml");

    // 2. 应用命令行参数
    let args: Vec<String> = std::env::args().collect();
    config.apply_args(&args);
    let frame_limit = arg_value(&args, "--frames").and_then(|v| v.parse::<u64>().ok());

    // 3. 验证配置
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    // 4. 初始化日志系统
    let log_file = config.logging.file_output.then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "frame_pipeline starting...");
    info!(
        backend = config.graphics.backend.name(),
        sync_mode = ?config.frame.sync_mode,
        buffers = config.graphics.buffer_count,
        width = config.window.width,
        height = config.window.height,
        "Graphics configuration"
    );

    let result = match config.graphics.backend {
        GraphicsBackend::Software => run_software(&config, frame_limit.unwrap_or(DEFAULT_HEADLESS_FRAMES)),
        GraphicsBackend::Dx12 => run_dx12(&config, frame_limit),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("frame_pipeline failed: {:#}", e);
        std::process::exit(1);
    }
    info!("frame_pipeline finished");
}

/// 创建上下文、交换链、场景与帧同步器
fn build_pipeline<B: GpuDevice>(
    device: Arc<B>,
    config: &Config,
    window: Option<RawWindowHandle>,
) -> Result<(FrameSynchronizer<B>, QuadScene<B>)> {
    let context = Arc::new(GpuContext::new(device, ContextOptions::from_config(config))?);
    let desc = SwapChainDesc::new(config.window.width, config.window.height, config.graphics.buffer_count);
    let swap_chain = context.create_swap_chain(desc, window)?;
    let scene = QuadScene::from_config(&context, &config.graphics)?;

    let frames = FrameSynchronizer::new(context, swap_chain, config.frame.sync_mode)?
        .with_pipeline(scene.pipeline().clone())
        .with_sync_interval(config.graphics.sync_interval());
    Ok((frames, scene))
}

fn log_report(report: &FrameReport) {
    debug!(
        frame = report.frame_number,
        target = report.target_index,
        fence = report.fence_value,
        waited = report.wait.blocked,
        commands = report.commands,
        cpu_us = report.cpu_time.as_micros() as u64,
        "Frame presented"
    );
}

/// 渲染一帧；可恢复的错误只放弃本帧
fn render_one<B: GpuDevice>(frames: &mut FrameSynchronizer<B>, scene: &QuadScene<B>) -> Result<()> {
    match frames.render_frame(|f| scene.record(f)) {
        Ok(report) => {
            log_report(&report);
            Ok(())
        }
        Err(e) if !e.is_fatal() => {
            warn!(frame = frames.frame_number(), "Frame aborted: {}", e);
            Ok(())
        }
        Err(e) => Err(e).context("Fatal frame error"),
    }
}

/// 软件设备：无窗口渲染固定帧数
fn run_software(config: &Config, frame_count: u64) -> Result<()> {
    let device = Arc::new(SoftwareDevice::create(
        &config.graphics.adapter,
        config.graphics.min_feature_level,
        config.validation.debug_layer,
    )?);
    let (mut frames, scene) = build_pipeline(device.clone(), config, None)?;

    for _ in 0..frame_count {
        render_one(&mut frames, &scene)?;
    }
    let drained = frames.flush()?;

    let snapshot = device.snapshot();
    info!(
        frames = frame_count,
        last_fence = drained.value,
        presents = snapshot.presents,
        draws = snapshot.draws,
        errors = snapshot.validation_errors(),
        warnings = snapshot.validation_warnings(),
        "Headless run complete"
    );
    for message in snapshot.messages.iter().take(16) {
        warn!("Validation: {:?}", message);
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn run_dx12(config: &Config, frame_limit: Option<u64>) -> Result<()> {
    use frame_pipeline::gfx::Dx12Device;

    run_windowed(config, frame_limit, || {
        Dx12Device::create(
            &config.graphics.adapter,
            config.graphics.min_feature_level,
            config.validation.debug_layer,
        )
    })
}

#[cfg(not(target_os = "windows"))]
fn run_dx12(_config: &Config, _frame_limit: Option<u64>) -> Result<()> {
    anyhow::bail!("DirectX 12 backend is only available on Windows; use --software")
}

/// 窗口模式：每次重绘渲染一帧，窗口尺寸变化时重建交换链缓冲
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn run_windowed<B, F>(config: &Config, frame_limit: Option<u64>, create_device: F) -> Result<()>
where
    B: GpuDevice,
    F: FnOnce() -> GpuResult<B>,
{
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.as_str())
        .with_inner_size(PhysicalSize::new(config.window.width, config.window.height))
        .with_resizable(config.window.resizable)
        .build(&event_loop)
        .context("Failed to create window")?;
    let handle = window
        .window_handle()
        .map(|h| h.as_raw())
        .context("Window does not expose a raw handle")?;

    let device = Arc::new(create_device()?);
    let (mut frames, scene) = build_pipeline(device, config, Some(handle))?;
    info!("Entering main loop...");

    let mut failure: Option<anyhow::Error> = None;
    event_loop
        .run(|event, elwt| match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    info!("Close requested, exiting");
                    elwt.exit();
                }
                WindowEvent::Resized(size) => {
                    // 最小化时尺寸为 0，保留原缓冲
                    if size.width == 0 || size.height == 0 {
                        return;
                    }
                    if let Err(e) = frames.resize(size.width, size.height) {
                        failure = Some(anyhow::Error::new(e).context("Resize failed"));
                        elwt.exit();
                    }
                }
                WindowEvent::RedrawRequested => {
                    if let Err(e) = render_one(&mut frames, &scene) {
                        failure = Some(e);
                        elwt.exit();
                    } else if frame_limit.map_or(false, |limit| frames.frame_number() >= limit) {
                        info!(frames = frames.frame_number(), "Frame limit reached");
                        elwt.exit();
                    }
                }
                _ => {}
            },
            Event::AboutToWait => window.request_redraw(),
            _ => {}
        })
        .context("Event loop terminated with an error")?;

    frames.flush()?;
    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
