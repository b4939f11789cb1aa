//! Instruction dispatch and user input.
//!
//! [`Client::run`] drains the session's inbound queue, applies drawing
//! instructions to the [`Display`] and flushes once per burst. Input
//! methods may be called from any task while `run` is in progress.

use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{ImageFormat, Rgba};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::display::{CanvasSnapshot, Display};
use crate::error::DriftError;
use crate::geom::{Point, Rect};
use crate::input::{KeyCode, MouseButtons, char_keysym};
use crate::layer::{CompositeOp, MAX_LAYER_DIMENSION};
use crate::protocol::Instruction;
use crate::protocol::opcode::{KEY, MOUSE, SYNC};
use crate::session::{Session, SessionState};
use crate::stream::Streams;

// ── Opcode ───────────────────────────────────────────────────────

/// Server instructions the client knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Opcode {
    Size,
    Copy,
    Img,
    Png,
    Jpeg,
    Cursor,
    Dispose,
    Cfill,
    Rect,
    Blob,
    End,
    Sync,
    Name,
    Error,
}

impl Opcode {
    fn parse(opcode: &str) -> Option<Self> {
        Some(match opcode {
            "size" => Self::Size,
            "copy" => Self::Copy,
            "img" => Self::Img,
            "png" => Self::Png,
            "jpeg" => Self::Jpeg,
            "cursor" => Self::Cursor,
            "dispose" => Self::Dispose,
            "cfill" => Self::Cfill,
            "rect" => Self::Rect,
            "blob" => Self::Blob,
            "end" => Self::End,
            "sync" => Self::Sync,
            "name" => Self::Name,
            "error" => Self::Error,
            _ => return None,
        })
    }
}

/// Typed access to instruction arguments.
struct Args<'a> {
    opcode: &'a str,
    args: &'a [String],
}

impl<'a> Args<'a> {
    fn new(instruction: &'a Instruction) -> Self {
        Self {
            opcode: instruction.opcode(),
            args: instruction.args(),
        }
    }

    fn invalid(&self, index: usize) -> DriftError {
        DriftError::InvalidArgument {
            opcode: self.opcode.to_string(),
            index,
        }
    }

    fn str(&self, index: usize) -> Result<&'a str, DriftError> {
        self.args
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| self.invalid(index))
    }

    fn parse<T: FromStr>(&self, index: usize) -> Result<T, DriftError> {
        self.str(index)?.parse().map_err(|_| self.invalid(index))
    }

    fn rect(&self, first: usize) -> Result<Rect, DriftError> {
        Ok(Rect::new(
            self.parse(first)?,
            self.parse(first + 1)?,
            self.parse(first + 2)?,
            self.parse(first + 3)?,
        ))
    }

    /// A layer width or height, refused above [`MAX_LAYER_DIMENSION`].
    fn dimension(&self, index: usize) -> Result<u32, DriftError> {
        let value: u32 = self.parse(index)?;
        if value > MAX_LAYER_DIMENSION {
            return Err(self.invalid(index));
        }
        Ok(value)
    }

    fn op(&self, index: usize) -> Result<CompositeOp, DriftError> {
        self.parse(index).map(CompositeOp::from_mask)
    }
}

// ── Client ───────────────────────────────────────────────────────

pub struct Client {
    session: Session,
    display: Display,
    streams: Mutex<Streams>,
}

impl Client {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            display: Display::default(),
            streams: Mutex::new(Streams::new()),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The composed remote screen.
    pub fn canvas(&self) -> CanvasSnapshot {
        self.display.canvas()
    }

    pub fn last_update(&self) -> u64 {
        self.display.last_update()
    }

    /// Process server instructions until the session ends.
    ///
    /// Returns the first handler error, after terminating the session.
    pub async fn run(&self) -> Result<(), DriftError> {
        while let Some(first) = self.session.recv().await {
            let mut next = Some(first);
            let mut batch = 0usize;
            while let Some(instruction) = next.take() {
                batch += 1;
                if let Err(e) = self.dispatch(&instruction).await {
                    error!(opcode = instruction.opcode(), "handler failed: {e}");
                    self.session.terminate().await;
                    return Err(e);
                }
                next = self.session.try_recv();
            }
            if let Some(area) = self.display.flush() {
                trace!(batch, ?area, "batch flushed");
            }
        }
        debug!("inbound closed, client stopped");
        Ok(())
    }

    async fn dispatch(&self, instruction: &Instruction) -> Result<(), DriftError> {
        let Some(opcode) = Opcode::parse(instruction.opcode()) else {
            debug!(opcode = instruction.opcode(), "unhandled instruction, skipped");
            return Ok(());
        };
        let args = Args::new(instruction);

        match opcode {
            Opcode::Size => {
                self.display
                    .resize(args.parse(0)?, args.dimension(1)?, args.dimension(2)?);
            }
            Opcode::Copy => {
                let src = args.parse(0)?;
                let area = args.rect(1)?;
                let op = args.op(5)?;
                self.display
                    .copy(src, area, args.parse(6)?, args.parse(7)?, args.parse(8)?, op);
            }
            Opcode::Img => {
                let stream: u32 = args.parse(0)?;
                let op = args.op(1)?;
                let layer: i32 = args.parse(2)?;
                let mimetype = args.str(3)?;
                let (x, y): (i32, i32) = (args.parse(4)?, args.parse(5)?);
                trace!(stream, layer, mimetype, "image stream opened");

                let display = self.display.clone();
                self.streams.lock().get(stream).on_end(Box::new(move |stream| {
                    display.draw(layer, x, y, stream.image()?, op);
                    Ok(())
                }));
            }
            Opcode::Png | Opcode::Jpeg => {
                let format = if opcode == Opcode::Png {
                    ImageFormat::Png
                } else {
                    ImageFormat::Jpeg
                };
                let op = args.op(0)?;
                let bytes = STANDARD.decode(args.str(4)?)?;
                let image = image::load_from_memory_with_format(&bytes, format)?.to_rgba8();
                self.display
                    .draw(args.parse(1)?, args.parse(2)?, args.parse(3)?, image, op);
            }
            Opcode::Cursor => {
                let hotspot = Point::new(args.parse(0)?, args.parse(1)?);
                self.display
                    .set_cursor(hotspot, args.parse(2)?, args.rect(3)?);
            }
            Opcode::Dispose => self.display.dispose(args.parse(0)?),
            Opcode::Cfill => {
                let op = args.op(0)?;
                let color = Rgba([
                    args.parse(2)?,
                    args.parse(3)?,
                    args.parse(4)?,
                    args.parse(5)?,
                ]);
                self.display.fill(args.parse(1)?, color, op);
            }
            Opcode::Rect => self.display.rect(args.parse(0)?, args.rect(1)?),
            Opcode::Blob => {
                let stream: u32 = args.parse(0)?;
                self.streams.lock().append(stream, args.str(1)?)?;
            }
            Opcode::End => {
                let stream: u32 = args.parse(0)?;
                let ended = self.streams.lock().end(stream)?;
                if !ended {
                    warn!(stream, "end for unknown stream");
                }
            }
            Opcode::Sync => {
                let timestamp = args.str(0)?;
                self.display.flush();
                self.session
                    .send(&[Instruction::new(SYNC, [timestamp])])
                    .await?;
            }
            Opcode::Name => {
                let name = args.str(0)?;
                info!(name, "remote display name");
            }
            Opcode::Error => {
                return Err(DriftError::Server {
                    message: args.str(0).unwrap_or_default().to_string(),
                    status: args.str(1).unwrap_or_default().to_string(),
                });
            }
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), DriftError> {
        if self.state().is_active() {
            Ok(())
        } else {
            Err(DriftError::NotConnected)
        }
    }

    /// Move the pointer to `position` with `buttons` held.
    pub async fn send_mouse(&self, position: Point, buttons: MouseButtons) -> Result<(), DriftError> {
        self.ensure_active()?;
        self.display.move_cursor(position);
        self.display.flush();
        let mouse = Instruction::new(
            MOUSE,
            [
                position.x.to_string(),
                position.y.to_string(),
                buttons.bits().to_string(),
            ],
        );
        self.session.send(&[mouse]).await
    }

    /// Press or release a non-printable key.
    pub async fn send_key(&self, key: KeyCode, pressed: bool) -> Result<(), DriftError> {
        self.ensure_active()?;
        let keysyms = key.keysyms();
        if keysyms.is_empty() {
            return Err(DriftError::InvalidKeyCode(key));
        }
        let state = if pressed { "1" } else { "0" };
        let keys: Vec<_> = keysyms
            .iter()
            .map(|keysym| Instruction::new(KEY, [keysym.to_string(), state.to_string()]))
            .collect();
        self.session.send(&keys).await
    }

    /// Type `text`: a press and a release per character.
    pub async fn send_text(&self, text: &str) -> Result<(), DriftError> {
        self.ensure_active()?;
        if text.is_empty() {
            return Ok(());
        }
        let keys: Vec<_> = text
            .chars()
            .flat_map(|c| {
                let keysym = char_keysym(c).to_string();
                [
                    Instruction::new(KEY, [keysym.clone(), "1".to_string()]),
                    Instruction::new(KEY, [keysym, "0".to_string()]),
                ]
            })
            .collect();
        self.session.send(&keys).await
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::SessionConfig;
    use crate::tunnel::mock::MockTunnel;

    const WAIT: Duration = Duration::from_secs(2);
    const PNG_1X15: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAAPAgMAAABYcU1qAAAACVBMVEX8/Pzc3Nzr6+uSJe5dAAAAEUlEQVQImWNgAAIHhgYGrAAAEd4AwbcvDeEAAAAASUVORK5CYII=";

    async fn handshaking_client(mock: &Arc<MockTunnel>) -> Client {
        let session = Session::start(mock.clone(), SessionConfig::new("mock", "vnc"))
            .await
            .unwrap();
        mock.clear();
        Client::new(session)
    }

    async fn active_client(mock: &Arc<MockTunnel>) -> Client {
        let client = handshaking_client(mock).await;
        mock.push(Instruction::new("ready", ["$id"]));
        client
            .session()
            .wait_for_state(SessionState::Active, WAIT)
            .await
            .unwrap();
        client
    }

    async fn wait_for_sync(mock: &MockTunnel, timestamp: &str) {
        let expected = Instruction::new("sync", [timestamp]);
        tokio::time::timeout(WAIT, async {
            while !mock.sent().contains(&expected) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sync reply not sent");
    }

    fn key(keysym: u32, pressed: &str) -> Instruction {
        Instruction::new("key", [keysym.to_string(), pressed.to_string()])
    }

    #[tokio::test]
    async fn input_refused_unless_active() {
        let mock = MockTunnel::new();
        let client = handshaking_client(&mock).await;
        assert_eq!(client.state(), SessionState::Handshaking);

        let err = client.send_key(KeyCode::Enter, true).await.unwrap_err();
        assert!(matches!(err, DriftError::NotConnected));
        let err = client.send_text("abc").await.unwrap_err();
        assert!(matches!(err, DriftError::NotConnected));
        let err = client
            .send_mouse(Point::new(0, 0), MouseButtons::RIGHT)
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::NotConnected));

        assert_eq!(mock.writes(), 0);
    }

    #[tokio::test]
    async fn mouse_position_and_buttons() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        client
            .send_mouse(Point::new(10, 20), MouseButtons::empty())
            .await
            .unwrap();
        client
            .send_mouse(Point::new(10, 20), MouseButtons::LEFT | MouseButtons::DOWN)
            .await
            .unwrap();

        let sent = mock.sent();
        assert_eq!(sent[0], Instruction::new("mouse", ["10", "20", "0"]));
        assert_eq!(sent[1].arg(2), Some("17"));
    }

    #[tokio::test]
    async fn single_keysym_key() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        client.send_key(KeyCode::Backspace, false).await.unwrap();
        assert_eq!(mock.sent(), [key(0xFF08, "0")]);
    }

    #[tokio::test]
    async fn multi_keysym_key_is_one_write() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        client.send_key(KeyCode::RightShift, true).await.unwrap();
        assert_eq!(mock.sent(), [key(0xFFE1, "1"), key(0xFFE2, "1")]);
        assert_eq!(mock.writes(), 1);
    }

    #[tokio::test]
    async fn unmapped_key_is_rejected() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        let err = client.send_key(KeyCode::FullWidth, true).await.unwrap_err();
        assert!(matches!(err, DriftError::InvalidKeyCode(KeyCode::FullWidth)));
        assert!(mock.sent().is_empty());
    }

    #[tokio::test]
    async fn text_presses_and_releases_each_char() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        client.send_text("bring").await.unwrap();
        let sent = mock.sent();
        assert_eq!(sent.len(), 10);
        assert_eq!(sent[0], key(u32::from(b'b'), "1"));
        assert_eq!(sent[1], key(u32::from(b'b'), "0"));
        assert_eq!(sent[2], key(u32::from(b'r'), "1"));
        assert_eq!(sent[3], key(u32::from(b'r'), "0"));
        assert_eq!(mock.writes(), 1);

        mock.clear();
        client.send_text("€").await.unwrap();
        assert_eq!(mock.sent()[0], key(0x0100_20AC, "1"));
    }

    #[tokio::test]
    async fn run_draws_and_answers_sync() {
        let mock = MockTunnel::new();
        let client = Arc::new(active_client(&mock).await);
        let runner = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });

        for instruction in [
            Instruction::new("size", ["0", "64", "32"]),
            Instruction::new("whatever", ["ignored"]),
            Instruction::new("rect", ["0", "0", "0", "8", "8"]),
            Instruction::new("cfill", ["14", "0", "255", "0", "0", "255"]),
            Instruction::new("sync", ["1234"]),
        ] {
            mock.push(instruction);
        }
        wait_for_sync(&mock, "1234").await;

        let canvas = client.canvas();
        assert_eq!((canvas.width(), canvas.height()), (64, 32));
        assert_eq!(*canvas.image.get_pixel(7, 7), Rgba([255, 0, 0, 255]));
        assert_eq!(canvas.image.get_pixel(8, 8).0[3], 0);
        assert!(client.last_update() > 0);

        mock.push(Instruction::bare("disconnect"));
        tokio::time::timeout(WAIT, runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn run_decodes_image_streams() {
        let mock = MockTunnel::new();
        let client = Arc::new(active_client(&mock).await);
        let runner = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });

        for instruction in [
            Instruction::new("size", ["0", "4", "16"]),
            Instruction::new("img", ["1", "12", "0", "image/png", "2", "0"]),
            Instruction::new("blob", ["1", PNG_1X15]),
            Instruction::new("end", ["1"]),
            Instruction::new("end", ["99"]),
            Instruction::new("sync", ["1"]),
        ] {
            mock.push(instruction);
        }
        wait_for_sync(&mock, "1").await;

        let canvas = client.canvas();
        assert_eq!(canvas.image.get_pixel(2, 14).0[3], 255);
        assert_eq!(canvas.image.get_pixel(1, 14).0[3], 0);

        client.session().terminate().await;
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn copy_and_cursor_reach_canvas() {
        let mock = MockTunnel::new();
        let client = Arc::new(active_client(&mock).await);
        let runner = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });

        for instruction in [
            Instruction::new("size", ["0", "20", "20"]),
            Instruction::new("rect", ["-1", "0", "0", "2", "2"]),
            Instruction::new("cfill", ["12", "-1", "0", "0", "255", "255"]),
            Instruction::new("copy", ["-1", "0", "0", "2", "2", "12", "0", "18", "18"]),
            Instruction::new("cursor", ["0", "0", "-1", "0", "0", "2", "2"]),
            Instruction::new("sync", ["5"]),
        ] {
            mock.push(instruction);
        }
        wait_for_sync(&mock, "5").await;

        let canvas = client.canvas();
        let blue = Rgba([0, 0, 255, 255]);
        assert_eq!(*canvas.image.get_pixel(19, 19), blue);
        assert_eq!(*canvas.image.get_pixel(0, 0), blue);

        client
            .send_mouse(Point::new(10, 10), MouseButtons::empty())
            .await
            .unwrap();
        let canvas = client.canvas();
        assert_eq!(canvas.image.get_pixel(0, 0).0[3], 0);
        assert_eq!(*canvas.image.get_pixel(11, 11), blue);

        client.session().terminate().await;
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn server_error_terminates() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        mock.push(Instruction::new("error", ["Aborted", "519"]));
        let err = tokio::time::timeout(WAIT, client.run())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(
            err,
            DriftError::Server { ref message, ref status } if message == "Aborted" && status == "519"
        ));
        assert_eq!(client.state(), SessionState::Closed);
        assert_eq!(mock.sent_opcodes(), ["disconnect"]);
    }

    #[tokio::test]
    async fn malformed_argument_terminates() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        mock.push(Instruction::new("size", ["0", "wide", "10"]));
        let err = tokio::time::timeout(WAIT, client.run())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(
            err,
            DriftError::InvalidArgument { ref opcode, index: 1 } if opcode == "size"
        ));
        assert!(client.state().is_closed());
    }

    #[tokio::test]
    async fn oversized_size_terminates() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        mock.push(Instruction::new("size", ["-1", "4294967295", "4294967295"]));
        let err = tokio::time::timeout(WAIT, client.run())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(
            err,
            DriftError::InvalidArgument { ref opcode, index: 1 } if opcode == "size"
        ));
        assert!(client.state().is_closed());
        assert_eq!(client.display().with_layer(-1, |layer| layer.width()), None);
    }

    #[tokio::test]
    async fn oversized_buffer_fill_is_clipped() {
        let mock = MockTunnel::new();
        let client = Arc::new(active_client(&mock).await);
        let runner = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });

        for instruction in [
            Instruction::new("rect", ["-1", "0", "0", "2147483647", "2147483647"]),
            Instruction::new("cfill", ["14", "-1", "255", "0", "0", "255"]),
            Instruction::new("sync", ["3"]),
        ] {
            mock.push(instruction);
        }
        wait_for_sync(&mock, "3").await;

        let size = client.display().with_layer(-1, |layer| (layer.width(), layer.height()));
        assert_eq!(size, Some((0, 0)));
        assert!(client.state().is_active());

        client.session().terminate().await;
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_draws_inline_png() {
        let mock = MockTunnel::new();
        let client = Arc::new(active_client(&mock).await);
        let runner = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.run().await }
        });

        for instruction in [
            Instruction::new("size", ["0", "4", "16"]),
            Instruction::new("png", ["12", "0", "2", "0", PNG_1X15]),
            Instruction::new("sync", ["8"]),
        ] {
            mock.push(instruction);
        }
        wait_for_sync(&mock, "8").await;

        let canvas = client.canvas();
        assert_eq!(canvas.image.get_pixel(2, 0).0[3], 255);
        assert_eq!(canvas.image.get_pixel(2, 14).0[3], 255);
        assert_eq!(canvas.image.get_pixel(1, 14).0[3], 0);
        assert_eq!(canvas.image.get_pixel(3, 0).0[3], 0);

        client.session().terminate().await;
        tokio::time::timeout(WAIT, runner).await.unwrap().unwrap().unwrap();
    }

    #[tokio::test]
    async fn inline_image_in_wrong_format_terminates() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        mock.push(Instruction::new("jpeg", ["12", "0", "0", "0", PNG_1X15]));
        let err = tokio::time::timeout(WAIT, client.run())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, DriftError::ImageDecode(_)));
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn inline_image_with_bad_base64_terminates() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        mock.push(Instruction::new("png", ["12", "0", "0", "0", "not*base64"]));
        let err = tokio::time::timeout(WAIT, client.run())
            .await
            .unwrap()
            .unwrap_err();

        assert!(matches!(err, DriftError::Base64(_)));
        assert_eq!(client.state(), SessionState::Closed);
        assert_eq!(mock.sent_opcodes(), ["disconnect"]);
    }

    #[tokio::test]
    async fn missing_argument_is_invalid() {
        let mock = MockTunnel::new();
        let client = active_client(&mock).await;

        let err = client
            .dispatch(&Instruction::new("dispose", Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, DriftError::InvalidArgument { index: 0, .. }));
    }
}
