// ONNX Runtime session builder with hardware acceleration detection

use ort::execution_providers::{CPUExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, Session};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::errors::ModelLoadError;

#[cfg(feature = "tensorrt")]
use ort::execution_providers::TensorRTExecutionProvider;

#[cfg(feature = "cuda")]
use ort::execution_providers::CUDAExecutionProvider;

#[cfg(all(target_os = "macos", feature = "coreml"))]
use ort::execution_providers::CoreMLExecutionProvider;

#[cfg(all(target_os = "windows", feature = "directml"))]
use ort::execution_providers::DirectMLExecutionProvider;

#[cfg(feature = "openvino")]
use ort::execution_providers::OpenVINOExecutionProvider;

/// Thread count for CPU inference.
///
/// Windows is capped at 6 threads; past that, synchronization overhead in
/// ONNX Runtime makes inference slower.
fn optimal_intra_op_threads() -> usize {
    let total_cores = num_cpus::get();

    #[cfg(target_os = "windows")]
    let optimal = std::cmp::min(6, total_cores).max(1);

    #[cfg(not(target_os = "windows"))]
    let optimal = total_cores.max(1);

    debug!("CPU threads: {} total cores, using {} for inference", total_cores, optimal);
    optimal
}

fn commit_with(
    model_path: &Path,
    provider: ExecutionProviderDispatch,
    level: GraphOptimizationLevel,
) -> ort::Result<Session> {
    Session::builder()
        .and_then(|b| b.with_execution_providers([provider]))
        .and_then(|b| b.with_optimization_level(level))
        .and_then(|b| b.with_intra_threads(optimal_intra_op_threads()))
        .and_then(|b| b.commit_from_file(model_path))
}

fn session_error(model_path: &Path) -> impl FnOnce(ort::Error) -> ModelLoadError + '_ {
    move |source| ModelLoadError::Session {
        path: model_path.display().to_string(),
        source,
    }
}

/// Build a session for the model at `model_path`.
///
/// `forced_backend` (from `INFERENCE_BACKEND`) pins one provider; `None` or
/// `AUTO` tries the compiled-in providers in order of preference:
/// TensorRT, CUDA, CoreML, DirectML, OpenVINO, then plain CPU.
///
/// Returns `(backend_name, session)`.
pub fn build_session(
    model_path: &Path,
    model_name: &str,
    forced_backend: Option<&str>,
) -> Result<(String, Session), ModelLoadError> {
    if !model_path.exists() {
        return Err(ModelLoadError::ModelNotFound {
            path: model_path.display().to_string(),
        });
    }

    info!("Loading {} model from {}", model_name, model_path.display());

    if let Some(backend) = forced_backend {
        let backend = backend.trim().to_ascii_uppercase();
        if !backend.is_empty() && backend != "AUTO" {
            info!("INFERENCE_BACKEND={}, forcing specific backend for {}", backend, model_name);
            return try_forced_backend(&backend, model_path, model_name);
        }
    }

    #[cfg(feature = "tensorrt")]
    {
        if let Ok(session) = commit_with(
            model_path,
            TensorRTExecutionProvider::default().build(),
            GraphOptimizationLevel::Level3,
        ) {
            info!("✓ Using TensorRT acceleration for {}", model_name);
            return Ok(("TensorRT".to_string(), session));
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(session) = commit_with(
            model_path,
            CUDAExecutionProvider::default().build(),
            GraphOptimizationLevel::Level3,
        ) {
            info!("✓ Using CUDA acceleration for {}", model_name);
            return Ok(("CUDA".to_string(), session));
        }
    }

    #[cfg(all(target_os = "macos", feature = "coreml"))]
    {
        if let Ok(session) = commit_with(
            model_path,
            CoreMLExecutionProvider::default().build(),
            GraphOptimizationLevel::Level3,
        ) {
            info!("✓ Using CoreML acceleration for {} (Apple Neural Engine)", model_name);
            return Ok(("CoreML".to_string(), session));
        }
    }

    #[cfg(all(target_os = "windows", feature = "directml"))]
    {
        // DirectML is only stable with conservative graph optimization
        if let Ok(session) = commit_with(
            model_path,
            DirectMLExecutionProvider::default().build(),
            GraphOptimizationLevel::Level1,
        ) {
            info!("✓ Using DirectML acceleration for {}", model_name);
            return Ok(("DirectML".to_string(), session));
        }
    }

    #[cfg(feature = "openvino")]
    {
        if let Ok(session) = commit_with(
            model_path,
            OpenVINOExecutionProvider::default().with_device_type("CPU").build(),
            GraphOptimizationLevel::Level3,
        ) {
            info!("✓ Using OpenVINO acceleration for {} (Intel CPU optimizations)", model_name);
            return Ok(("OpenVINO-CPU".to_string(), session));
        }
    }

    let session = commit_with(
        model_path,
        CPUExecutionProvider::default().build(),
        GraphOptimizationLevel::Level3,
    )
    .map_err(session_error(model_path))?;

    warn!("⚠️  Using CPU-only inference for {} (no GPU acceleration available)", model_name);
    Ok(("CPU".to_string(), session))
}

fn try_forced_backend(
    backend: &str,
    model_path: &Path,
    model_name: &str,
) -> Result<(String, Session), ModelLoadError> {
    let (name, provider, level) = match backend {
        #[cfg(feature = "tensorrt")]
        "TENSORRT" => (
            "TensorRT",
            TensorRTExecutionProvider::default().build(),
            GraphOptimizationLevel::Level3,
        ),
        #[cfg(feature = "cuda")]
        "CUDA" => (
            "CUDA",
            CUDAExecutionProvider::default().build(),
            GraphOptimizationLevel::Level3,
        ),
        #[cfg(feature = "openvino")]
        "OPENVINO" => (
            "OpenVINO-CPU",
            OpenVINOExecutionProvider::default().with_device_type("CPU").build(),
            GraphOptimizationLevel::Level3,
        ),
        #[cfg(all(target_os = "windows", feature = "directml"))]
        "DIRECTML" => (
            "DirectML",
            DirectMLExecutionProvider::default().build(),
            GraphOptimizationLevel::Level1,
        ),
        #[cfg(all(target_os = "macos", feature = "coreml"))]
        "COREML" => (
            "CoreML",
            CoreMLExecutionProvider::default().build(),
            GraphOptimizationLevel::Level3,
        ),
        "CPU" => (
            "CPU",
            CPUExecutionProvider::default().build(),
            GraphOptimizationLevel::Level3,
        ),
        "TENSORRT" | "CUDA" | "OPENVINO" | "DIRECTML" | "COREML" => {
            return Err(ModelLoadError::BackendUnavailable(backend.to_string()));
        }
        other => return Err(ModelLoadError::UnknownBackend(other.to_string())),
    };

    let session = commit_with(model_path, provider, level).map_err(session_error(model_path))?;
    info!("✓ Forced {} backend for {}", name, model_name);
    Ok((format!("{} (forced)", name), session))
}
