//! Outbound input vocabulary: mouse button masks and logical key codes.
//!
//! Key codes are toolkit-neutral; front ends translate their own key
//! events into [`KeyCode`] and the client turns those into X11 keysyms.

use bitflags::bitflags;

bitflags! {
    /// Pressed mouse buttons, sent as the mask argument of `mouse`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MouseButtons: u32 {
        const LEFT   = 1 << 0;
        const MIDDLE = 1 << 1;
        const RIGHT  = 1 << 2;
        /// Scroll wheel up.
        const UP     = 1 << 3;
        /// Scroll wheel down.
        const DOWN   = 1 << 4;
    }
}

// ── KeyCode ──────────────────────────────────────────────────────

/// Logical keys that have no printable character.
///
/// Right-hand modifiers map to the base symbol followed by the
/// right-specific symbol; some servers only honour one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Again,
    AllCandidates,
    Alphanumeric,
    LeftAlt,
    RightAlt,
    Attn,
    AltGraph,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    ArrowUp,
    Backspace,
    CapsLock,
    Cancel,
    Clear,
    Convert,
    Copy,
    CrSel,
    CodeInput,
    Compose,
    LeftControl,
    RightControl,
    ContextMenu,
    Delete,
    End,
    Enter,
    EraseEof,
    Escape,
    Execute,
    ExSel,
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
    F13,
    F14,
    F15,
    F16,
    F17,
    F18,
    F19,
    F20,
    F21,
    F22,
    F23,
    F24,
    Find,
    GroupFirst,
    GroupLast,
    GroupNext,
    GroupPrevious,
    FullWidth,
    HalfWidth,
    HangulMode,
    Hankaku,
    HanjaMode,
    Help,
    Hiragana,
    HiraganaKatakana,
    Home,
    LeftHyper,
    RightHyper,
    Insert,
    JapaneseHiragana,
    JapaneseKatakana,
    JapaneseRomaji,
    JunjaMode,
    KanaMode,
    KanjiMode,
    Katakana,
    LeftMeta,
    RightMeta,
    ModeChange,
    NumLock,
    PageDown,
    PageUp,
    Pause,
    Play,
    PreviousCandidate,
    PrintScreen,
    Redo,
    RomanCharacters,
    Scroll,
    Select,
    Separator,
    LeftShift,
    RightShift,
    SingleCandidate,
    LeftSuper,
    RightSuper,
    Tab,
    Undo,
    Win,
    Zenkaku,
    ZenkakuHankaku,
}

impl KeyCode {
    /// Keysyms emitted for this key, in send order. Empty when the key
    /// has no keysym.
    pub const fn keysyms(self) -> &'static [u32] {
        use KeyCode::*;
        match self {
            Again | Redo => &[0xFF66],
            AllCandidates => &[0xFF3D],
            Alphanumeric => &[0xFF30],
            LeftAlt => &[0xFFE9],
            RightAlt => &[0xFFE9, 0xFE03],
            Attn => &[0xFD0E],
            AltGraph => &[0xFE03],
            ArrowDown => &[0xFF54],
            ArrowLeft => &[0xFF51],
            ArrowRight => &[0xFF53],
            ArrowUp => &[0xFF52],
            Backspace => &[0xFF08],
            CapsLock => &[0xFFE5],
            Cancel => &[0xFF69],
            Clear => &[0xFF0B],
            Convert | KanjiMode => &[0xFF21],
            Copy => &[0xFD15],
            CrSel => &[0xFD1C],
            CodeInput => &[0xFF37],
            Compose => &[0xFF20],
            LeftControl => &[0xFFE3],
            RightControl => &[0xFFE3, 0xFFE4],
            ContextMenu => &[0xFF67],
            Delete => &[0xFFFF],
            End => &[0xFF57],
            Enter => &[0xFF0D],
            EraseEof => &[0xFD06],
            Escape => &[0xFF1B],
            Execute => &[0xFF62],
            ExSel => &[0xFD1D],
            F1 => &[0xFFBE],
            F2 => &[0xFFBF],
            F3 => &[0xFFC0],
            F4 => &[0xFFC1],
            F5 => &[0xFFC2],
            F6 => &[0xFFC3],
            F7 => &[0xFFC4],
            F8 => &[0xFFC5],
            F9 => &[0xFFC6],
            F10 => &[0xFFC7],
            F11 => &[0xFFC8],
            F12 => &[0xFFC9],
            F13 => &[0xFFCA],
            F14 => &[0xFFCB],
            F15 => &[0xFFCC],
            F16 => &[0xFFCD],
            F17 => &[0xFFCE],
            F18 => &[0xFFCF],
            F19 => &[0xFFD0],
            F20 => &[0xFFD1],
            F21 => &[0xFFD2],
            F22 => &[0xFFD3],
            F23 => &[0xFFD4],
            F24 => &[0xFFD5],
            Find => &[0xFF68],
            GroupFirst => &[0xFE0C],
            GroupLast => &[0xFE0E],
            GroupNext => &[0xFE08],
            GroupPrevious => &[0xFE0A],
            FullWidth | HalfWidth | RomanCharacters => &[],
            HangulMode => &[0xFF31],
            Hankaku => &[0xFF29],
            HanjaMode => &[0xFF34],
            Help => &[0xFF6A],
            Hiragana | JapaneseHiragana => &[0xFF25],
            HiraganaKatakana => &[0xFF27],
            Home => &[0xFF50],
            LeftHyper => &[0xFFED],
            RightHyper => &[0xFFED, 0xFFEE],
            Insert => &[0xFF63],
            Katakana | JapaneseKatakana => &[0xFF26],
            JapaneseRomaji => &[0xFF24],
            JunjaMode => &[0xFF38],
            KanaMode => &[0xFF2D],
            LeftMeta => &[0xFFE7],
            RightMeta => &[0xFFE7, 0xFFE8],
            ModeChange => &[0xFF7E],
            NumLock => &[0xFF7F],
            PageDown => &[0xFF56],
            PageUp => &[0xFF55],
            Pause => &[0xFF13],
            Play => &[0xFD16],
            PreviousCandidate => &[0xFF3E],
            PrintScreen => &[0xFF61],
            Scroll => &[0xFF14],
            Select => &[0xFF60],
            Separator => &[0xFFAC],
            LeftShift => &[0xFFE1],
            RightShift => &[0xFFE1, 0xFFE2],
            SingleCandidate => &[0xFF3C],
            LeftSuper | Win => &[0xFFEB],
            RightSuper => &[0xFFEB, 0xFFEC],
            Tab => &[0xFF09],
            Undo => &[0xFF65],
            Zenkaku => &[0xFF28],
            ZenkakuHankaku => &[0xFF2A],
        }
    }
}

/// Keysym for a printable character: Latin-1 maps to itself, everything
/// else to the X11 Unicode keysym range.
pub fn char_keysym(c: char) -> u32 {
    let code = c as u32;
    if code <= 0xFF { code } else { 0x0100_0000 | code }
}
