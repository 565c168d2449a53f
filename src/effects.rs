//! Lighting effects. Each effect writes a pattern of colour and dimmer
//! commands to the snapshot's lights, one light at a time, and never reads
//! anything back.

use std::ops::RangeInclusive;
use std::time::Duration;

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use smol::Timer;

use crate::command::Transport;
use crate::device::{Light, Xy};
use crate::session::Session;
use crate::{Error, Result};

pub const GREEN: Xy = Xy::new(26870, 33423);
pub const RED: Xy = Xy::new(42926, 21299);
pub const BLUE: Xy = Xy::new(11469, 3277);
pub const PINK: Xy = Xy::new(32768, 15729);
pub const LIME: Xy = Xy::new(29491, 30802);
pub const WARM_WHITE: Xy = Xy::new(32977, 27105);
pub const COLD_WHITE: Xy = Xy::new(25022, 24884);

pub const PALETTE: [Xy; 7] = [GREEN, RED, BLUE, PINK, LIME, WARM_WHITE, COLD_WHITE];

/// Drawn brightness below this is sent as 0: the bulbs render very low
/// levels poorly, so they go fully dark instead.
pub const BRIGHTNESS_FLOOR: u8 = 21;
pub const BRIGHTNESS_MAX: u8 = 100;

const RANDOM_XY: RangeInclusive<u16> = 9..=60000;

pub fn floor_brightness(brightness: u8) -> u8 {
    if brightness < BRIGHTNESS_FLOOR {
        0
    } else {
        brightness
    }
}

/// Brightness of the light `offset` places behind the darkest one, rising
/// linearly from `min` at offset 0 to `max` at offset `count - 1`.
pub fn train_brightness(min: u8, max: u8, offset: usize, count: usize) -> u8 {
    let span = (count - 1) as i64;
    let level = (min as i64 * span + (max as i64 - min as i64) * offset as i64).div_euclid(span);
    level.clamp(0, u8::MAX as i64) as u8
}

/// Fixed pauses inside effects that take no timing arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Between a light's colour and its brightness in the chaotic blink.
    pub chaotic: Duration,
    /// After each predetermined round.
    pub predetermined: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Timings {
            chaotic: Duration::from_millis(150),
            predetermined: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Blink {
        sleep: Duration,
        wake: Duration,
        transition: Duration,
        random_colour: bool,
    },
    Chaotic,
    Predetermined,
    SynchBrightness {
        sleep: Duration,
    },
    SynchAll {
        sleep: Duration,
    },
    Train {
        speed: Duration,
        min: u8,
        max: u8,
        order: Vec<usize>,
    },
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::Blink { .. } => "blink_on_off",
            Effect::Chaotic => "chaotic_blink",
            Effect::Predetermined => "predetermined",
            Effect::SynchBrightness { .. } => "synch_brightness",
            Effect::SynchAll { .. } => "synch_all",
            Effect::Train { .. } => "light_train",
        }
    }
}

impl Default for Effect {
    fn default() -> Self {
        Effect::Blink {
            sleep: Duration::from_millis(200),
            wake: Duration::from_millis(500),
            transition: Duration::from_micros(100),
            random_colour: true,
        }
    }
}

async fn pause(duration: Duration) {
    if !duration.is_zero() {
        Timer::after(duration).await;
    }
}

pub struct Effects<'a, T, R> {
    session: &'a Session<T>,
    lights: &'a [Light],
    rng: R,
    timings: Timings,
}

impl<'a, T: Transport, R: Rng> Effects<'a, T, R> {
    pub fn new(session: &'a Session<T>, lights: &'a [Light], rng: R) -> Self {
        Effects {
            session,
            lights,
            rng,
            timings: Timings::default(),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    fn random_xy(&mut self) -> Xy {
        Xy::new(
            self.rng.gen_range(RANDOM_XY),
            self.rng.gen_range(RANDOM_XY),
        )
    }

    fn random_brightness(&mut self) -> u8 {
        self.rng.gen_range(0..=BRIGHTNESS_MAX)
    }

    fn palette_colour(&mut self) -> Xy {
        *PALETTE.choose(&mut self.rng).unwrap_or(&WARM_WHITE)
    }

    async fn colour(&self, light: &Light, colour: Xy) -> Result<()> {
        self.session
            .dispatch(&light.set_xy_color(colour, None))
            .await
    }

    async fn dim(&self, light: &Light, level: u8, transition: Option<Duration>) -> Result<()> {
        self.session
            .dispatch(&light.set_dimmer(level, transition))
            .await
    }

    /// Turns every light fully up, holds for `wake`, then fully down and holds
    /// for `sleep`. Without `random_colour` all lights share one cold white.
    pub async fn blink_on_off(
        &mut self,
        sleep: Duration,
        wake: Duration,
        transition: Duration,
        random_colour: bool,
    ) -> Result<()> {
        let lights = self.lights;
        if !random_colour {
            for light in lights {
                self.colour(light, COLD_WHITE).await?;
            }
        }

        for light in lights {
            if random_colour {
                let colour = self.random_xy();
                self.colour(light, colour).await?;
            }
            self.dim(light, BRIGHTNESS_MAX, Some(transition)).await?;
        }
        pause(wake).await;

        for light in lights {
            self.dim(light, 0, Some(transition)).await?;
        }
        pause(sleep).await;
        Ok(())
    }

    /// Every light gets its own random colour and brightness.
    pub async fn chaotic_blink(&mut self) -> Result<()> {
        let lights = self.lights;
        for light in lights {
            let colour = self.random_xy();
            self.colour(light, colour).await?;
            let brightness = floor_brightness(self.random_brightness());
            pause(self.timings.chaotic).await;
            self.dim(light, brightness, None).await?;
        }
        Ok(())
    }

    /// The first two lights share one palette colour, the third gets its
    /// own. Any further lights are left alone.
    pub async fn predetermined(&mut self) -> Result<()> {
        let lights = self.lights;
        let (pair, accent) = match lights {
            [first, second, third, ..] => ([first, second], third),
            _ => {
                return Err(Error::TooFewLights {
                    effect: "predetermined",
                    required: 3,
                    found: lights.len(),
                })
            }
        };

        let shared = self.palette_colour();
        for light in pair {
            self.colour(light, shared).await?;
            let brightness = self.random_brightness();
            self.dim(light, brightness, None).await?;
        }

        let own = self.palette_colour();
        self.colour(accent, own).await?;
        let brightness = self.random_brightness();
        self.dim(accent, brightness, None).await?;

        pause(self.timings.predetermined).await;
        Ok(())
    }

    /// One brightness for all lights, a different random colour for each.
    pub async fn synch_brightness(&mut self, sleep: Duration) -> Result<()> {
        let brightness = floor_brightness(self.random_brightness());
        let lights = self.lights;
        for light in lights {
            let colour = self.random_xy();
            self.colour(light, colour).await?;
            self.dim(light, brightness, None).await?;
        }
        pause(sleep).await;
        Ok(())
    }

    /// One brightness and one colour for all lights.
    pub async fn synch_all(&mut self, sleep: Duration) -> Result<()> {
        let brightness = floor_brightness(self.random_brightness());
        let colour = self.random_xy();
        for light in self.lights {
            self.colour(light, colour).await?;
            self.dim(light, brightness, None).await?;
        }
        pause(sleep).await;
        Ok(())
    }

    /// Runs a brightness gradient along `order`, starting the darkest point
    /// at each listed light in turn. `order` names lights by their position
    /// in the snapshot.
    pub async fn light_train(
        &mut self,
        speed: Duration,
        min: u8,
        max: u8,
        order: &[usize],
    ) -> Result<()> {
        let count = self.lights.len();
        if count < 2 {
            return Err(Error::TooFewLights {
                effect: "light_train",
                required: 2,
                found: count,
            });
        }
        if let Some(&index) = order.iter().find(|&&index| index >= count) {
            return Err(Error::LightOrder { index, count });
        }

        let lights = self.lights;
        for light in lights {
            self.colour(light, WARM_WHITE).await?;
        }

        for &darkest in order {
            for &offset in order {
                let current = &lights[(darkest + offset) % count];
                let brightness = train_brightness(min, max, offset, count);
                debug!("train: {} at {}", current, brightness);
                self.dim(current, brightness, None).await?;
                pause(speed).await;
            }
        }
        Ok(())
    }

    pub async fn play(&mut self, effect: &Effect) -> Result<()> {
        match effect {
            Effect::Blink {
                sleep,
                wake,
                transition,
                random_colour,
            } => {
                self.blink_on_off(*sleep, *wake, *transition, *random_colour)
                    .await
            }
            Effect::Chaotic => self.chaotic_blink().await,
            Effect::Predetermined => self.predetermined().await,
            Effect::SynchBrightness { sleep } => self.synch_brightness(*sleep).await,
            Effect::SynchAll { sleep } => self.synch_all(*sleep).await,
            Effect::Train {
                speed,
                min,
                max,
                order,
            } => self.light_train(*speed, *min, *max, order).await,
        }
    }

    /// Plays `effect` over and over. Only returns on the first failed command,
    /// or straight away with `TooFewLights` when there is nothing to animate.
    pub async fn run_forever(&mut self, effect: &Effect) -> Result<()> {
        if self.lights.is_empty() {
            return Err(Error::TooFewLights {
                effect: effect.name(),
                required: 1,
                found: 0,
            });
        }
        info!("running {} on {} lights", effect.name(), self.lights.len());
        loop {
            self.play(effect).await?;
        }
    }
}
