//! Built-in install plans for the supported components
//!
//! Step sequences mirror how a JetPack image is provisioned: the CUDA
//! toolchain and its companion libraries come from the NVIDIA apt
//! repositories, with the local-repo bundle staged from the fetched
//! artifact; OpenCV is compiled from source with CUDA enabled, using
//! the compute architecture of the board the tool is running on.

use std::path::PathBuf;

use super::step::{IdempotencyCheck, InstallStep, ShellCommand, StepAction};
use crate::catalog::{Component, VersionSpec};

/// Fallback compute architecture when the board cannot be identified.
pub const DEFAULT_CUDA_ARCH: &str = "7.2";

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";

/// cmake switches for an OpenCV CUDA build on Jetson.
const OPENCV_BUILD_OPTIONS: &[(&str, &str)] = &[
    ("CMAKE_BUILD_TYPE", "RELEASE"),
    ("CMAKE_INSTALL_PREFIX", "/usr"),
    ("EIGEN_INCLUDE_PATH", "/usr/include/eigen3"),
    ("WITH_OPENCL", "OFF"),
    ("WITH_CUDA", "ON"),
    ("WITH_CUDNN", "ON"),
    ("WITH_CUBLAS", "ON"),
    ("ENABLE_FAST_MATH", "ON"),
    ("CUDA_FAST_MATH", "ON"),
    ("OPENCV_DNN_CUDA", "ON"),
    ("ENABLE_NEON", "ON"),
    ("WITH_QT", "OFF"),
    ("WITH_OPENMP", "ON"),
    ("BUILD_TIFF", "ON"),
    ("WITH_FFMPEG", "ON"),
    ("WITH_GSTREAMER", "ON"),
    ("WITH_TBB", "ON"),
    ("BUILD_TBB", "ON"),
    ("BUILD_TESTS", "OFF"),
    ("WITH_EIGEN", "ON"),
    ("WITH_V4L", "ON"),
    ("WITH_LIBV4L", "ON"),
    ("WITH_PROTOBUF", "ON"),
    ("OPENCV_ENABLE_NONFREE", "ON"),
    ("INSTALL_C_EXAMPLES", "OFF"),
    ("INSTALL_PYTHON_EXAMPLES", "OFF"),
    ("OPENCV_GENERATE_PKGCONFIG", "ON"),
    ("BUILD_EXAMPLES", "OFF"),
];

/// Build dependencies for the OpenCV source build, grouped the way
/// they are installed.
const OPENCV_BUILD_DEPS: &[&str] = &[
    "build-essential cmake git unzip pkg-config zlib1g-dev",
    "python3-dev python3-numpy python3-pip",
    "gstreamer1.0-tools libgstreamer-plugins-base1.0-dev libgstreamer-plugins-good1.0-dev",
    "libtbb2 libtbb-dev libgtk-3-dev libgtk2.0-dev libxine2-dev libglew-dev",
    "libjpeg-dev libjpeg8-dev libjpeg-turbo8-dev libpng-dev libtiff-dev",
    "libavcodec-dev libavformat-dev libswscale-dev libpostproc-dev libavresample-dev",
    "libxvidcore-dev libx264-dev libdc1394-22-dev",
    "libv4l-dev v4l-utils",
    "libtesseract-dev libvorbis-dev libmp3lame-dev libtheora-dev",
    "libopencore-amrnb-dev libopencore-amrwb-dev",
    "libopenblas-dev libatlas-base-dev libblas-dev liblapack-dev liblapacke-dev libeigen3-dev gfortran",
    "libhdf5-dev libprotobuf-dev protobuf-compiler libgoogle-glog-dev libgflags-dev",
];

/// Filesystem locations a plan is rendered against.
pub struct PlanPaths {
    /// Per-version working directory where the artifact is unpacked.
    pub work_dir: PathBuf,

    /// Shell profile receiving environment exports.
    pub profile: PathBuf,
}

/// The ordered install steps for a resolved version.
pub fn steps_for(spec: &VersionSpec, paths: &PlanPaths) -> Vec<InstallStep> {
    match spec.component {
        Component::Cuda => cuda_steps(&spec.version, paths),
        Component::OpenCv => opencv_steps(&spec.version, paths),
    }
}

fn cuda_steps(version: &str, paths: &PlanPaths) -> Vec<InstallStep> {
    let repo_dir = paths.work_dir.join(format!("cuda-repo-{version}"));
    let profile = shell_words::quote(&paths.profile.to_string_lossy()).into_owned();

    vec![
        InstallStep::new(
            "unpack",
            0,
            StepAction::ExtractArtifact {
                dest: paths.work_dir.clone(),
            },
            IdempotencyCheck::PathExists(repo_dir),
        ),
        InstallStep::new(
            "install-cuda-toolkit",
            1,
            StepAction::Commands(vec![
                ShellCommand::new("sudo apt-get update"),
                ShellCommand::new("sudo apt-get install -y cuda"),
            ]),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new("dpkg -s cuda")),
        ),
        InstallStep::new(
            "install-cudnn",
            2,
            StepAction::Commands(vec![ShellCommand::new(
                "sudo apt-get install -y libcudnn8 libcudnn8-dev",
            )]),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new("dpkg -s libcudnn8")),
        ),
        InstallStep::new(
            "install-tensorrt",
            3,
            StepAction::Commands(vec![ShellCommand::new("sudo apt-get install -y tensorrt")]),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new("dpkg -s tensorrt")),
        ),
        InstallStep::new(
            "install-vpi",
            4,
            StepAction::Commands(vec![ShellCommand::new("sudo apt-get install -y libnvvpi2")]),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new("dpkg -s libnvvpi2")),
        ),
        InstallStep::new(
            "configure-environment",
            5,
            StepAction::AppendProfile {
                path: paths.profile.clone(),
                lines: vec![
                    "export PATH=/usr/local/cuda/bin:$PATH".to_string(),
                    "export LD_LIBRARY_PATH=/usr/local/cuda/lib64:$LD_LIBRARY_PATH".to_string(),
                ],
            },
            IdempotencyCheck::CommandSucceeds(ShellCommand::new(format!(
                "grep -q /usr/local/cuda/bin {profile}"
            ))),
        ),
        InstallStep::new(
            "verify-toolkit",
            6,
            StepAction::Commands(vec![ShellCommand::new("nvcc --version")]),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new("nvcc --version")),
        ),
    ]
}

fn opencv_steps(version: &str, paths: &PlanPaths) -> Vec<InstallStep> {
    let src_dir = paths.work_dir.join(format!("opencv-{version}"));
    let build_dir = src_dir.join("build");
    let jobs = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let mut deps_commands: Vec<ShellCommand> = vec![ShellCommand::new("sudo apt-get update")];
    deps_commands.extend(
        OPENCV_BUILD_DEPS
            .iter()
            .map(|packages| ShellCommand::new(format!("sudo apt-get install -y {packages}"))),
    );

    vec![
        InstallStep::new(
            "unpack",
            0,
            StepAction::ExtractArtifact {
                dest: paths.work_dir.clone(),
            },
            IdempotencyCheck::PathExists(src_dir.clone()),
        ),
        InstallStep::new(
            "install-build-deps",
            1,
            StepAction::Commands(deps_commands),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new("dpkg -s build-essential cmake")),
        ),
        InstallStep::new(
            "configure",
            2,
            StepAction::Commands(vec![
                ShellCommand::in_dir("mkdir -p build", &src_dir),
                ShellCommand::in_dir(cmake_command(&detect_cuda_arch()), &build_dir),
            ]),
            IdempotencyCheck::PathExists(build_dir.join("CMakeCache.txt")),
        ),
        InstallStep::new(
            "build",
            3,
            StepAction::Commands(vec![ShellCommand::in_dir(
                format!("make -j{jobs}"),
                &build_dir,
            )]),
            IdempotencyCheck::PathExists(build_dir.join("lib/libopencv_core.so")),
        ),
        InstallStep::new(
            "install",
            4,
            StepAction::Commands(vec![
                ShellCommand::in_dir("sudo make install", &build_dir),
                ShellCommand::new("sudo ldconfig"),
            ]),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new(
                "pkg-config --modversion opencv4",
            )),
        ),
        InstallStep::new(
            "verify",
            5,
            StepAction::Commands(vec![ShellCommand::new("pkg-config --modversion opencv4")]),
            IdempotencyCheck::CommandSucceeds(ShellCommand::new(
                "pkg-config --modversion opencv4",
            )),
        ),
    ]
}

fn cmake_command(cuda_arch: &str) -> String {
    let mut command = String::from("cmake");
    for (key, value) in OPENCV_BUILD_OPTIONS {
        command.push_str(&format!(" -D{key}={value}"));
    }
    command.push_str(&format!(" -DCUDA_ARCH_BIN={cuda_arch} .."));
    command
}

/// CUDA compute architecture of the board we are running on, read from
/// the device tree. Non-Jetson hosts fall back to the default.
pub fn detect_cuda_arch() -> String {
    match std::fs::read_to_string(DEVICE_TREE_MODEL) {
        Ok(model) => cuda_arch_for_model(&model).to_string(),
        Err(_) => {
            tracing::warn!(
                "unable to read {DEVICE_TREE_MODEL}, using CUDA arch {DEFAULT_CUDA_ARCH}"
            );
            DEFAULT_CUDA_ARCH.to_string()
        }
    }
}

fn cuda_arch_for_model(model: &str) -> &'static str {
    let model = model.to_lowercase().replace(' ', "-");
    if model.contains("orin-nano") {
        "8.6"
    } else if model.contains("orin-nx") {
        "8.7"
    } else if model.contains("agx") {
        "7.2"
    } else if model.contains("xavier-nx") {
        "6.2"
    } else {
        DEFAULT_CUDA_ARCH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_paths() -> PlanPaths {
        PlanPaths {
            work_dir: PathBuf::from("/var/cache/jetforge/test/work"),
            profile: PathBuf::from("/home/user/.bashrc"),
        }
    }

    fn spec(component: Component, version: &str) -> VersionSpec {
        VersionSpec {
            component,
            version: version.to_string(),
            is_default: true,
            source_url: "https://example.com/a.tar.gz".to_string(),
            expected_checksum: None,
        }
    }

    #[test]
    fn ordinals_are_sequential() {
        for component in Component::ALL {
            let steps = steps_for(&spec(component, "1.0.0"), &plan_paths());
            for (index, step) in steps.iter().enumerate() {
                assert_eq!(step.ordinal, index, "{component} step {}", step.name);
            }
        }
    }

    #[test]
    fn both_plans_start_by_unpacking_the_artifact() {
        for component in Component::ALL {
            let steps = steps_for(&spec(component, "1.0.0"), &plan_paths());
            assert_eq!(steps[0].name, "unpack");
            assert!(matches!(
                steps[0].action,
                StepAction::ExtractArtifact { .. }
            ));
        }
    }

    #[test]
    fn cuda_plan_covers_the_toolchain() {
        let steps = steps_for(&spec(Component::Cuda, "10.2.89"), &plan_paths());
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "unpack",
                "install-cuda-toolkit",
                "install-cudnn",
                "install-tensorrt",
                "install-vpi",
                "configure-environment",
                "verify-toolkit",
            ]
        );
    }

    #[test]
    fn opencv_configure_enables_cuda() {
        let command = cmake_command("8.7");
        assert!(command.starts_with("cmake "));
        assert!(command.ends_with(" .."));
        assert!(command.contains("-DWITH_CUDA=ON"));
        assert!(command.contains("-DOPENCV_DNN_CUDA=ON"));
        assert!(command.contains("-DCUDA_ARCH_BIN=8.7"));
    }

    #[test]
    fn opencv_source_paths_are_versioned() {
        let paths = plan_paths();
        let steps = steps_for(&spec(Component::OpenCv, "4.4.0"), &paths);
        match &steps[0].check {
            IdempotencyCheck::PathExists(path) => {
                assert_eq!(path, &paths.work_dir.join("opencv-4.4.0"));
            }
            other => panic!("expected PathExists check, got {other:?}"),
        }
    }

    #[test]
    fn model_detection_maps_known_boards() {
        assert_eq!(cuda_arch_for_model("NVIDIA Jetson Orin Nano Developer Kit"), "8.6");
        assert_eq!(cuda_arch_for_model("NVIDIA Jetson Orin NX"), "8.7");
        assert_eq!(cuda_arch_for_model("jetson-agx-xavier"), "7.2");
        assert_eq!(cuda_arch_for_model("NVIDIA Jetson Xavier NX Developer Kit"), "6.2");
        assert_eq!(cuda_arch_for_model("some desktop pc"), DEFAULT_CUDA_ARCH);
    }
}
