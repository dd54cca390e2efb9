//! Echofield - live agent session activity as a spatial soundscape
//!
//! Each active session is a draggable point on a radar field; its position
//! drives a spatialized audio voice and a particle burst per event, and
//! persists across runs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use glam::Vec2;
use log::{info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use echofield::audio::AudioEngine;
use echofield::cli::Args;
use echofield::events::{self, EventCategory, InboundMessage, SessionEvent};
use echofield::overlay::OverlayController;
use echofield::params::{
    EnvelopeParams, ParticleStyles, RadarStyle, RenderConfig, ReverbParams, SoundPalette,
    SpatialParams,
};
use echofield::radar::{ParticleField, RadarGeometry};
use echofield::rendering::{background_rgba, RenderSystem, ShapeInstance};
use echofield::store::PositionStore;

/// Main application state
struct App {
    // Window and rendering
    window: Option<Arc<Window>>,
    render: Option<RenderSystem>,

    // Component systems
    store: PositionStore,
    audio: AudioEngine,
    overlay: OverlayController,
    field: ParticleField,
    geom: RadarGeometry,

    // Configuration
    style: RadarStyle,
    palette: SoundPalette,
    render_config: RenderConfig,

    // Input and frame bookkeeping
    cursor: Vec2,
    scale_factor: f32,
    pending_resize: Option<(PhysicalSize<u32>, Instant)>,
    needs_clear: bool,
    dirty: bool,
}

impl App {
    fn new(args: &Args) -> Self {
        let store = PositionStore::open(args.store_config());
        let audio = AudioEngine::new(
            SpatialParams::default(),
            EnvelopeParams::default(),
            ReverbParams::default(),
            args.mix_params(),
        );
        let style = RadarStyle::default();
        let render_config = args.render_config();
        let overlay = OverlayController::new(style.removal_fade_s);
        let field = ParticleField::new(ParticleStyles::default());
        let geom = RadarGeometry::new(
            render_config.window_width as f32,
            render_config.window_height as f32,
            &style,
        );

        Self {
            window: None,
            render: None,
            store,
            audio,
            overlay,
            field,
            geom,
            style,
            palette: SoundPalette::default(),
            render_config,
            cursor: Vec2::ZERO,
            scale_factor: 1.0,
            pending_resize: None,
            needs_clear: true,
            dirty: true,
        }
    }

    fn request_redraw(&self) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    /// One inbound activity record: resolve/create the session, play its
    /// tone, spawn a particle at the marker's screen position.
    fn handle_event(&mut self, ev: &SessionEvent) {
        let color = events::parse_color(&ev.color);
        let pos = self
            .overlay
            .ensure_session(&ev.session_key, color, &self.store, &mut self.audio);

        let category = ev.category();
        let major = ev.is_major_action();
        let tone = match (category, major) {
            (EventCategory::Completion, _) => &self.palette.completion,
            (EventCategory::ActionPre, true) | (EventCategory::ActionPost, true) => {
                &self.palette.action_major
            }
            (EventCategory::ActionPre, false) => &self.palette.action_pre,
            (EventCategory::ActionPost, false) => &self.palette.action_post,
            (EventCategory::Other, _) => &self.palette.default_blip,
        };
        let pan = ev.pan_or_position_hint.unwrap_or(0.0);
        self.audio.play_sound(tone, Some(&ev.session_key), pan);

        let screen = self.geom.to_screen(pos);
        self.field.spawn(category, major, screen, color);
        self.dirty = true;
        self.request_redraw();
    }

    fn handle_key(&mut self, code: KeyCode, event_loop: &ActiveEventLoop) {
        match code {
            KeyCode::Escape => event_loop.exit(),
            KeyCode::KeyM => {
                let muted = self.audio.toggle_mute();
                info!("mute: {}", muted);
            }
            KeyCode::KeyR => {
                self.overlay.reset_layout(&mut self.store, &mut self.audio);
                self.dirty = true;
                self.request_redraw();
            }
            KeyCode::ArrowUp => {
                let v = self.audio.volume() + 0.05;
                self.audio.set_volume(v);
            }
            KeyCode::ArrowDown => {
                let v = self.audio.volume() - 0.05;
                self.audio.set_volume(v);
            }
            KeyCode::ArrowRight => {
                let m = self.audio.reverb_mix() + 0.05;
                self.audio.set_reverb_mix(m);
            }
            KeyCode::ArrowLeft => {
                let m = self.audio.reverb_mix() - 0.05;
                self.audio.set_reverb_mix(m);
            }
            _ => {}
        }
    }

    /// Render a single frame: advance the particle tick, fade the
    /// previous frame into a trail, redraw the static radar layer,
    /// particles and markers.
    fn frame(&mut self) {
        let Some(render) = self.render.as_mut() else {
            return;
        };
        let now = Instant::now();
        self.overlay.tick_removals(now, &mut self.audio);

        let was_running = self.field.is_running();
        let running = self.field.tick();
        // The tick that removed the last particle ends the run with one
        // clean static draw, wiping leftover trails.
        let clear = self.needs_clear || (was_running && !running);

        let mut instances: Vec<ShapeInstance> = Vec::with_capacity(64);
        if !clear {
            let (w, h) = render.size();
            let half = Vec2::new(w as f32 * 0.5, h as f32 * 0.5);
            instances.push(ShapeInstance::rect(
                half,
                half,
                background_rgba(self.style.fade_alpha),
            ));
        }
        self.geom
            .static_layer(&self.style, self.scale_factor, &mut instances);
        self.field.instances(&mut instances);
        self.overlay.instances(
            &self.geom,
            self.style.marker_radius_px * self.scale_factor,
            now,
            &mut instances,
        );

        match render.render(&instances, clear) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let (w, h) = render.size();
                render.resize(w, h);
            }
            Err(e) => warn!("render error: {:?}", e),
        }

        self.needs_clear = false;
        self.dirty = false;
    }
}

impl ApplicationHandler<InboundMessage> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return; // Already initialized
        }

        let window_attributes = Window::default_attributes()
            .with_title("Echofield")
            .with_inner_size(winit::dpi::LogicalSize::new(
                self.render_config.window_width,
                self.render_config.window_height,
            ));
        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                warn!("failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        let render = match pollster::block_on(RenderSystem::new(Arc::clone(&window))) {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to initialize rendering: {}", e);
                event_loop.exit();
                return;
            }
        };

        self.scale_factor = window.scale_factor() as f32;
        let size = window.inner_size();
        self.geom = RadarGeometry::new(size.width as f32, size.height as f32, &self.style);

        // Explicit one-time startup; failure degrades to a silent run.
        self.audio.init();

        self.window = Some(window);
        self.render = Some(render);
        self.needs_clear = true;
        self.request_redraw();
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, message: InboundMessage) {
        match message {
            InboundMessage::Event { event } => self.handle_event(&event),
            InboundMessage::SessionRemoved { session_key } => {
                self.overlay.remove_session(&session_key, Instant::now());
                self.dirty = true;
                self.request_redraw();
            }
            InboundMessage::Snapshot { sessions } => {
                for event in &sessions {
                    self.handle_event(event);
                }
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        physical_key: PhysicalKey::Code(code),
                        ..
                    },
                ..
            } => self.handle_key(code, event_loop),
            WindowEvent::ScaleFactorChanged { scale_factor, .. } => {
                self.scale_factor = scale_factor as f32;
            }
            WindowEvent::Resized(size) => {
                // Debounced: reconfigure once the size settles
                self.pending_resize = Some((size, Instant::now()));
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = Vec2::new(position.x as f32, position.y as f32);
                if self.overlay.is_dragging() {
                    self.overlay
                        .pointer_move(self.cursor, &self.geom, &mut self.audio);
                    self.dirty = true;
                    self.request_redraw();
                }
            }
            WindowEvent::MouseInput {
                state: ElementState::Pressed,
                button: MouseButton::Left,
                ..
            } => {
                self.overlay.pointer_down(
                    self.cursor,
                    &self.geom,
                    self.style.marker_radius_px * self.scale_factor,
                );
                self.dirty = true;
                self.request_redraw();
            }
            WindowEvent::MouseInput {
                state: ElementState::Released,
                button: MouseButton::Left,
                ..
            } => {
                self.overlay.pointer_up(&mut self.store);
                self.dirty = true;
                self.request_redraw();
            }
            WindowEvent::RedrawRequested => self.frame(),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // Apply a settled resize; until then, wake at the debounce deadline.
        let mut wake: Option<Instant> = None;
        if let Some((size, at)) = self.pending_resize {
            let deadline = at + Duration::from_millis(self.style.resize_debounce_ms);
            if Instant::now() >= deadline {
                self.pending_resize = None;
                if let Some(render) = &mut self.render {
                    render.resize(size.width, size.height);
                }
                self.geom =
                    RadarGeometry::new(size.width as f32, size.height as f32, &self.style);
                self.needs_clear = true;
                self.dirty = true;
            } else {
                wake = Some(deadline);
            }
        }
        event_loop.set_control_flow(match wake {
            Some(t) => ControlFlow::WaitUntil(t),
            None => ControlFlow::Wait,
        });

        // Keep frames coming while anything animates; the present pace
        // ties the tick rate to the display refresh. Idle otherwise.
        if self.field.is_running() || self.overlay.has_fading() || self.dirty {
            self.request_redraw();
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let event_loop = EventLoop::<InboundMessage>::with_user_event()
        .build()
        .expect("failed to build event loop");
    let _reader = events::spawn_stdin_reader(event_loop.create_proxy());

    let mut app = App::new(&args);
    let _ = event_loop.run_app(&mut app);
}
