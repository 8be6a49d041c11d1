mod event_view;
mod painter;
mod profile_view;
mod summary_view;
mod table;

pub(crate) use self::event_view::EventView;
pub(crate) use self::painter::Painter;
pub(crate) use self::profile_view::ProfileView;
pub(crate) use self::summary_view::SummaryView;
