use crate::frame::FrameInfo;

/// A group of objects updated together once per variable step, before any
/// phase handler runs.
///
/// `awake` runs when the driver starts (or on registration if it already
/// has), `clear` when it quits.
pub trait UserGroup: Send {
    fn name(&self) -> &str;

    fn awake(&mut self) {}

    fn update(&mut self, frame: &FrameInfo);

    fn clear(&mut self) {}
}
