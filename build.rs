fn main() {
    prost_build::compile_protos(&["proto/sync.proto"], &["proto/"])
        .expect("failed to compile sync.proto");
}
