//! End-to-end flows over the recording backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nativekit_engine::{constants, EngineConfig, EngineError, IndexData, NativeEngine};
use nativekit_gpu::{Capabilities, DiagnosticsSink, GpuBackend, RecordingBackend, TextureKind};
use nativekit_tasks::TaskError;

const VERTEX: &str = r#"#version 450
layout(location = 0) in vec3 a_position;
layout(location = 10) in vec2 a_texcoord0;
layout(location = 0) out vec2 v_uv;

layout(set = 0, binding = 0) uniform Frame {
    mat4 worldViewProjection;
    mat4 normalMatrix;
    float brightness;
};

void main() {
    v_uv = (normalMatrix * vec4(a_texcoord0, 1.0, 0.0)).xy * brightness;
    gl_Position = worldViewProjection * vec4(a_position, 1.0);
}
"#;

const FRAGMENT: &str = r#"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 fragColor;

layout(set = 0, binding = 1) uniform texture2D albedoTexture;
layout(set = 0, binding = 2) uniform sampler albedo;

void main() {
    vec4 color = texture(sampler2D(albedoTexture, albedo), v_uv);
    fragColor = color + vec4(dFdy(v_uv.y));
}
"#;

fn engine() -> NativeEngine<RecordingBackend> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let sink = Arc::new(DiagnosticsSink::new());
    let backend = RecordingBackend::new(Capabilities::default(), 1, 1, sink.clone());
    let config = EngineConfig::default().with_size(320, 240).with_worker_threads(2);
    NativeEngine::new(backend, sink, config).unwrap()
}

fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(color));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(image)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Outcome counters shared with load callbacks.
#[derive(Clone, Default)]
struct Outcome {
    successes: Arc<AtomicUsize>,
    errors: Arc<AtomicUsize>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Outcome {
    fn on_success(&self) -> impl FnOnce() + Send + 'static {
        let successes = self.successes.clone();
        move || {
            successes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_error(&self) -> impl FnOnce(TaskError) + Send + 'static {
        let errors = self.errors.clone();
        let last_error = self.last_error.clone();
        move |err| {
            errors.fetch_add(1, Ordering::SeqCst);
            *last_error.lock().unwrap() = Some(err.to_string());
        }
    }

    fn settled(&self) -> bool {
        self.successes.load(Ordering::SeqCst) + self.errors.load(Ordering::SeqCst) > 0
    }
}

/// Drain render jobs until the load settles.
fn pump(engine: &mut NativeEngine<RecordingBackend>, outcome: &Outcome) {
    for _ in 0..1000 {
        engine.tick();
        if outcome.settled() {
            // Let a late duplicate show up if there is one.
            std::thread::sleep(Duration::from_millis(20));
            engine.tick();
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("texture load did not settle");
}

#[test]
fn test_texture_load_uploads_before_success() {
    let mut engine = engine();
    let texture = engine.create_texture();
    assert!(!engine.texture_handle(texture).unwrap().is_valid());

    let outcome = Outcome::default();
    engine
        .load_texture(
            texture,
            png(8, 4, [10, 20, 30, 255]),
            true,
            true,
            outcome.on_success(),
            outcome.on_error(),
        )
        .unwrap();
    pump(&mut engine, &outcome);

    assert_eq!(outcome.successes.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.errors.load(Ordering::SeqCst), 0);

    let handle = engine.texture_handle(texture).unwrap();
    assert!(handle.is_valid());
    assert_eq!(engine.get_texture_width(texture).unwrap(), 8);
    assert_eq!(engine.get_texture_height(texture).unwrap(), 4);

    let record = engine.backend().texture(handle).unwrap();
    assert!(record.desc.has_mips);
    assert_eq!(&record.data.as_ref().unwrap()[..4], &[10, 20, 30, 255]);
}

#[test]
fn test_corrupt_image_reports_error_once() {
    let mut engine = engine();
    let texture = engine.create_texture();

    let outcome = Outcome::default();
    engine
        .load_texture(
            texture,
            b"definitely not a png".to_vec(),
            false,
            false,
            outcome.on_success(),
            outcome.on_error(),
        )
        .unwrap();
    pump(&mut engine, &outcome);

    assert_eq!(outcome.successes.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.errors.load(Ordering::SeqCst), 1);
    assert!(outcome.last_error.lock().unwrap().is_some());
    assert!(!engine.texture_handle(texture).unwrap().is_valid());
}

#[test]
fn test_cube_texture_from_faces() {
    let mut engine = engine();
    let texture = engine.create_texture();
    let faces: Vec<Vec<u8>> = (0..6u8).map(|face| png(4, 4, [face * 40, 0, 0, 255])).collect();

    let outcome = Outcome::default();
    engine
        .load_cube_texture(texture, faces, false, outcome.on_success(), outcome.on_error())
        .unwrap();
    pump(&mut engine, &outcome);
    assert_eq!(outcome.successes.load(Ordering::SeqCst), 1);

    assert_eq!(engine.get_texture_width(texture).unwrap(), 4);
    let handle = engine.texture_handle(texture).unwrap();
    let record = engine.backend().texture(handle).unwrap();
    assert_eq!(record.desc.kind, TextureKind::Cube);

    let data = record.data.as_ref().unwrap();
    let face_size = 4 * 4 * 4;
    assert_eq!(data.len(), face_size * 6);
    for (face, chunk) in data.chunks_exact(face_size).enumerate() {
        assert_eq!(chunk[0], face as u8 * 40);
    }
}

#[test]
fn test_cube_texture_needs_six_faces() {
    let mut engine = engine();
    let texture = engine.create_texture();
    let faces = vec![png(4, 4, [0, 0, 0, 255]); 5];
    assert!(matches!(
        engine.load_cube_texture(texture, faces, false, || {}, |_| {}),
        Err(EngineError::InvalidArgument(_))
    ));
}

#[test]
fn test_cube_texture_with_mips() {
    let mut engine = engine();
    let texture = engine.create_texture();
    let levels = vec![
        (0..6).map(|_| png(4, 4, [1, 2, 3, 255])).collect::<Vec<_>>(),
        (0..6).map(|_| png(2, 2, [4, 5, 6, 255])).collect(),
        (0..6).map(|_| png(1, 1, [7, 8, 9, 255])).collect(),
    ];

    let outcome = Outcome::default();
    engine
        .load_cube_texture_with_mips(texture, levels, outcome.on_success(), outcome.on_error())
        .unwrap();
    pump(&mut engine, &outcome);
    assert_eq!(outcome.successes.load(Ordering::SeqCst), 1);

    let handle = engine.texture_handle(texture).unwrap();
    let record = engine.backend().texture(handle).unwrap();
    assert!(record.desc.has_mips);
    // Face 0 holds its whole chain before face 1 starts.
    let data = record.data.as_ref().unwrap();
    assert_eq!(&data[..4], &[1, 2, 3, 255]);
    assert_eq!(&data[64..68], &[4, 5, 6, 255]);
    assert_eq!(&data[80..84], &[7, 8, 9, 255]);
    assert_eq!(&data[84..88], &[1, 2, 3, 255]);
}

#[test]
fn test_uniform_lookup_and_matrix3x3_upload() {
    let mut engine = engine();
    let program = engine.create_program(VERTEX, FRAGMENT).unwrap();
    engine.set_program(program).unwrap();

    let uniforms = engine
        .get_uniforms(program, &["brightness", "albedo", "normalMatrix", "missing"])
        .unwrap();
    assert!(uniforms[0].is_some());
    assert!(uniforms[1].is_some());
    assert!(uniforms[3].is_none());

    let attributes = engine.get_attributes(program, &["position", "uv"]).unwrap();
    assert_eq!(attributes, vec![Some(0), Some(10)]);

    let normal = uniforms[2].unwrap();
    let values: Vec<f32> = (1..=9).map(|v| v as f32).collect();
    engine.set_matrix3x3(normal, &values).unwrap();
    engine.draw_indexed(constants::TRIANGLE_FILL_MODE, 0, 3).unwrap();

    let draw = engine.backend().draw_calls().last().unwrap();
    let upload = draw.uniform("normalMatrix").unwrap();
    assert_eq!(
        upload.values,
        vec![1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0, 0.0, 0.0, 0.0, 0.0]
    );
    assert_eq!(upload.num, 1);
}

#[test]
fn test_static_index_buffer_survives_draw() {
    let mut engine = engine();
    let program = engine.create_program(VERTEX, FRAGMENT).unwrap();
    engine.set_program(program).unwrap();

    let indices = vec![0u16, 1, 2, 2, 1, 3];
    let index_buffer = engine
        .create_index_buffer(IndexData::U16(indices.clone()), false)
        .unwrap();
    let positions = engine.create_vertex_buffer(vec![0; 4 * 12], false);
    let vertex_array = engine.create_vertex_array();
    engine.record_index_buffer(vertex_array, index_buffer).unwrap();
    engine
        .record_vertex_buffer(vertex_array, positions, 0, 0, 12, 3, constants::FLOAT, false)
        .unwrap();
    engine.bind_vertex_array(vertex_array).unwrap();
    engine.draw_indexed(constants::TRIANGLE_FILL_MODE, 0, 6).unwrap();

    let draw = engine.backend().draw_calls().last().unwrap().clone();
    let binding = draw.index_buffer.unwrap();
    let bytes = engine.backend().index_buffer_data(binding.buffer).unwrap();
    let stored: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    assert_eq!(stored, indices);

    assert!(matches!(
        engine.update_dynamic_index_buffer(index_buffer, &IndexData::U16(vec![9]), 0),
        Err(EngineError::NonDynamicUpdate { .. })
    ));
}

#[test]
fn test_vertex_buffer_updates() {
    let mut engine = engine();

    let fixed = engine.create_vertex_buffer(vec![0; 12], false);
    assert!(matches!(
        engine.update_dynamic_vertex_buffer(fixed, &[1; 12], 0, 12),
        Err(EngineError::NonDynamicUpdate { .. })
    ));

    // Updates before the first layout replace the staged bytes with the
    // selected range of the source.
    let dynamic = engine.create_vertex_buffer(vec![0; 12], true);
    let mut source = vec![0u8; 12];
    source.extend_from_slice(&[7; 12]);
    engine
        .update_dynamic_vertex_buffer(dynamic, &source, 12, 12)
        .unwrap();

    let vertex_array = engine.create_vertex_array();
    engine
        .record_vertex_buffer(vertex_array, dynamic, 0, 0, 12, 3, constants::FLOAT, false)
        .unwrap();
    engine.bind_vertex_array(vertex_array).unwrap();

    let program = engine.create_program(VERTEX, FRAGMENT).unwrap();
    engine.set_program(program).unwrap();
    engine.draw(constants::TRIANGLE_FILL_MODE, 0, 2).unwrap();

    let draw = engine.backend().draw_calls().last().unwrap().clone();
    let stream = draw.vertex_streams[0];
    assert_eq!(stream.num_vertices, 2);
    let record = engine.backend().vertex_buffer(stream.buffer).unwrap();
    assert_eq!(record.data, vec![7; 12]);

    engine
        .update_dynamic_vertex_buffer(dynamic, &[9; 12], 0, 0)
        .unwrap();
    let record = engine.backend().vertex_buffer(stream.buffer).unwrap();
    assert_eq!(record.data, vec![9; 12]);
}

#[test]
fn test_view_ids_restart_each_frame() {
    let mut engine = engine();
    let color = engine.create_texture();
    let frame_buffer = engine
        .create_frame_buffer(color, 64, 64, constants::TEXTURETYPE_UNSIGNED_INT, 0, false, true, false)
        .unwrap();

    let mut views = Vec::new();
    for _ in 0..3 {
        engine.bind_frame_buffer(frame_buffer).unwrap();
        views.push(engine.frame_buffer_manager().bound().view_id());
        engine.unbind_frame_buffer(frame_buffer).unwrap();
    }
    assert!(views.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(engine.frame_buffer_manager().bound().view_id(), 0);

    engine.end_frame();
    engine.bind_frame_buffer(frame_buffer).unwrap();
    assert_eq!(engine.frame_buffer_manager().bound().view_id(), 1);

    engine.clear_color(0.0, 1.0, 0.0, 1.0);
    let view = engine.backend().view(1).unwrap();
    assert_eq!(view.clear.unwrap().rgba, 0x00ff_00ff);
    assert!(view.frame_buffer.is_valid());
}

#[test]
fn test_readback_of_back_buffer_clear() {
    let mut engine = engine();
    let mut pixels = Vec::new();
    engine
        .get_frame_buffer_data(0, 0, 1, 1, |data| pixels = data)
        .unwrap();
    assert_eq!(pixels, vec![0x44, 0x33, 0x55, 0xff]);
    assert!(engine.backend().frame_number() >= 1);
    assert_eq!(engine.backend().stats().width, 320);
}

#[test]
fn test_dispose_silences_pending_loads() {
    let mut engine = engine();
    let flat = engine.create_texture();
    let cube = engine.create_texture();
    let outcome = Outcome::default();

    engine
        .load_texture(
            flat,
            png(64, 64, [1, 2, 3, 255]),
            true,
            true,
            outcome.on_success(),
            outcome.on_error(),
        )
        .unwrap();
    let faces = (0..6).map(|_| png(16, 16, [9, 9, 9, 255])).collect();
    engine
        .load_cube_texture(cube, faces, true, outcome.on_success(), outcome.on_error())
        .unwrap();
    engine.dispose();

    // Give the workers time to finish or abandon their stages.
    for _ in 0..40 {
        engine.tick();
        std::thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(outcome.successes.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.errors.load(Ordering::SeqCst), 0);
    assert!(!engine.texture_handle(flat).unwrap().is_valid());
    assert!(!engine.texture_handle(cube).unwrap().is_valid());
    assert!(!engine.backend().commands().iter().any(|command| matches!(
        command,
        nativekit_gpu::Command::Create {
            resource: nativekit_gpu::Resource::Texture(_)
        }
    )));
}
