//! Build script for ALICE-MLP.
//!
//! When the `cuda` feature is enabled, compiles `csrc/wmma_gemm.cu`
//! into a static library that Rust links against.
//!
//! Requirements (cuda feature only):
//! - NVIDIA CUDA Toolkit (nvcc on PATH or CUDA_TOOLKIT_ROOT_DIR set)
//! - cc crate

fn main() {
    #[cfg(feature = "cuda")]
    {
        build_cuda();
    }
}

#[cfg(feature = "cuda")]
fn build_cuda() {
    let mut build = cc::Build::new();

    // wmma needs Tensor Cores: Volta (7.0) and newer
    build
        .cuda(true)
        .file("csrc/wmma_gemm.cu")
        .include("csrc")
        .flag("-gencode=arch=compute_70,code=sm_70")
        .flag("-gencode=arch=compute_75,code=sm_75")
        .flag("-gencode=arch=compute_80,code=sm_80")
        .flag("-gencode=arch=compute_86,code=sm_86")
        .flag("-gencode=arch=compute_89,code=sm_89")
        .flag("-gencode=arch=compute_90,code=sm_90")
        .flag("-O3")
        .warnings(false);

    if let Ok(cuda_root) = std::env::var("CUDA_TOOLKIT_ROOT_DIR") {
        build.include(format!("{cuda_root}/include"));
        println!("cargo:rustc-link-search=native={cuda_root}/lib64");
    }

    build.compile("alice_mlp_cuda");

    println!("cargo:rustc-link-lib=cudart");

    println!("cargo:rerun-if-changed=csrc/wmma_gemm.cu");
    println!("cargo:rerun-if-changed=csrc/alice_mlp_c_api.h");
    println!("cargo:rerun-if-env-changed=CUDA_TOOLKIT_ROOT_DIR");
}
